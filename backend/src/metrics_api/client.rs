use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::{ChainListPage, FetchError, MetricPage, MetricsSource, TimeWindow};
use crate::config::MetricsApiConfig;
use crate::types::MetricKind;

/// HTTP client for the paginated metrics/explorer API.
pub struct MetricsApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_key_header: String,
    timeout: Duration,
}

impl MetricsApiClient {
    pub fn new(config: &MetricsApiConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_key_header: config.api_key_header.clone(),
            timeout: config.request_timeout,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let mut request = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .query(query);
        if let Some(key) = &self.api_key {
            request = request.header(self.api_key_header.as_str(), key.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MetricsSource for MetricsApiClient {
    async fn list_chains_page(&self, page_token: Option<String>) -> Result<ChainListPage, FetchError> {
        let mut query = Vec::new();
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json("/chains", &query).await
    }

    async fn metric_page(
        &self,
        chain_id: &str,
        metric: MetricKind,
        window: TimeWindow,
        page_token: Option<String>,
    ) -> Result<MetricPage, FetchError> {
        let mut query = vec![
            ("timeInterval", "day".to_string()),
            ("startTimestamp", window.start.to_string()),
            ("endTimestamp", window.end.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let path = format!("/chains/{}/metrics/{}", chain_id, metric.api_name());
        self.get_json(&path, &query).await
    }

    fn source_name(&self) -> &str {
        "metrics_api"
    }
}
