use std::sync::Arc;
use tracing::{info, warn};

use super::{reconcile_all, SyncError, SyncReport};
use crate::database::{ChainRecordStore, MetricSeriesWriter};
use crate::metrics_api::{ApiChain, MetricsSource};
use crate::reconcile::Reconciler;
use crate::scheduler::RateLimitedScheduler;
use crate::types::ChainDescriptor;

/// Pulls the metrics API chain listing and reconciles each chain as a live-data descriptor.
pub struct ChainListSync {
    source: Arc<dyn MetricsSource>,
    scheduler: Arc<RateLimitedScheduler>,
    store: Arc<dyn ChainRecordStore>,
    series: Option<MetricSeriesWriter>,
    reconciler: Reconciler,
}

impl ChainListSync {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        scheduler: Arc<RateLimitedScheduler>,
        store: Arc<dyn ChainRecordStore>,
    ) -> Self {
        Self {
            source,
            scheduler,
            store,
            series: None,
            reconciler: Reconciler::new(),
        }
    }

    /// Moves stored metric series along when a record is re-keyed.
    pub fn with_series_writer(mut self, series: MetricSeriesWriter) -> Self {
        self.series = Some(series);
        self
    }

    /// A page that fails after retries ends pagination; chains already listed are still reconciled.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let mut chains: Vec<ApiChain> = Vec::new();
        let mut token: Option<String> = None;
        let mut page = 0u32;

        loop {
            page += 1;
            let label = format!("{} chains page {}", self.source.source_name(), page);
            let source = &self.source;
            let page_token = token.clone();
            let result = self
                .scheduler
                .enqueue(&label, move || {
                    let page_token = page_token.clone();
                    async move { source.list_chains_page(page_token).await }
                })
                .await;

            match result {
                Ok(listing) => {
                    chains.extend(listing.chains);
                    match listing.next_page_token.filter(|t| !t.is_empty()) {
                        Some(next) if Some(&next) != token.as_ref() => token = Some(next),
                        _ => break,
                    }
                }
                Err(failure) => {
                    warn!("Chain listing stopped at page {}: {}", page, failure);
                    report.fail(label, &failure);
                    break;
                }
            }
        }

        let descriptors: Vec<ChainDescriptor> = chains.into_iter().map(ApiChain::into_descriptor).collect();
        reconcile_all(&self.store, self.series.as_ref(), &self.reconciler, &descriptors, &mut report).await;

        info!(
            "Chain list sync: {} processed, {} created, {} updated, {} unchanged, {} ambiguous, {} failures",
            report.processed,
            report.created,
            report.updated,
            report.unchanged,
            report.ambiguous,
            report.failures.len()
        );
        Ok(report)
    }
}
