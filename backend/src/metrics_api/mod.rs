pub mod client;
pub mod models;

pub use client::MetricsApiClient;
pub use models::{ApiChain, ApiValidator, ChainListPage, MetricPage, RawSample};

use async_trait::async_trait;

use crate::scheduler::Retryable;
use crate::types::MetricKind;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimited => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map_or(false, |s| s.as_u16() == 429 || s.is_server_error())
            }
            FetchError::Decode(_) => false,
        }
    }
}

/// Inclusive time range of a metric query, Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

/// The live metrics/explorer upstream. One call is one page, i.e. one scheduled task.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn list_chains_page(&self, page_token: Option<String>) -> Result<ChainListPage, FetchError>;

    async fn metric_page(
        &self,
        chain_id: &str,
        metric: MetricKind,
        window: TimeWindow,
        page_token: Option<String>,
    ) -> Result<MetricPage, FetchError>;

    fn source_name(&self) -> &str;
}
