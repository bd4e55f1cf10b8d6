use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::{ChainRecordStore, MetricSeriesWriter};
use crate::metrics_api::{FetchError, MetricsSource, RawSample, TimeWindow};
use crate::reconcile::{Change, Reconciler};
use crate::scheduler::{RateLimitedScheduler, TaskFailure};
use crate::types::{ChainDescriptor, ChainRecord, LiveDataUpdate, MetricKind, PrimaryId, SourceTag};

use super::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFailure {
    pub chain: String,
    pub metric: MetricKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricBatchReport {
    pub chains: usize,
    pub series_written: usize,
    pub samples_inserted: usize,
    pub samples_updated: usize,
    pub samples_unchanged: usize,
    pub samples_dropped: usize,
    pub snapshots_updated: usize,
    pub failures: Vec<MetricFailure>,
}

/// Fetches every metric series of every chain known by numeric id.
pub struct MetricFetcher {
    source: Arc<dyn MetricsSource>,
    scheduler: Arc<RateLimitedScheduler>,
    store: Arc<dyn ChainRecordStore>,
    writer: MetricSeriesWriter,
    reconciler: Reconciler,
    lookback: Duration,
    metrics: Vec<MetricKind>,
}

impl MetricFetcher {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        scheduler: Arc<RateLimitedScheduler>,
        store: Arc<dyn ChainRecordStore>,
        writer: MetricSeriesWriter,
        lookback_days: i64,
    ) -> Self {
        Self {
            source,
            scheduler,
            store,
            writer,
            reconciler: Reconciler::new(),
            lookback: Duration::days(lookback_days.max(1)),
            metrics: MetricKind::ALL.to_vec(),
        }
    }

    pub fn with_metrics(mut self, metrics: Vec<MetricKind>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Per (chain, metric) failures are collected; only a failure to list the records aborts.
    pub async fn run(&self) -> Result<MetricBatchReport, SyncError> {
        let records = self.store.list().await?;
        let now = Utc::now();
        let window = TimeWindow {
            start: (now - self.lookback).timestamp(),
            end: now.timestamp(),
        };

        let mut report = MetricBatchReport::default();
        for record in records.iter().filter(|r| r.ids.legacy_numeric_id.is_some()) {
            report.chains += 1;
            self.fetch_chain(record, window, &mut report).await;
        }

        info!(
            "Metric fetch: {} chains, {} series, {} inserted, {} updated, {} unchanged, {} dropped, {} failures",
            report.chains,
            report.series_written,
            report.samples_inserted,
            report.samples_updated,
            report.samples_unchanged,
            report.samples_dropped,
            report.failures.len()
        );
        Ok(report)
    }

    async fn fetch_chain(&self, record: &ChainRecord, window: TimeWindow, report: &mut MetricBatchReport) {
        let Some(chain_id) = record.ids.legacy_numeric_id.as_deref() else {
            return;
        };
        let chain_identifier = record.storage_key();
        let mut snapshots = BTreeMap::new();

        for &metric in &self.metrics {
            let samples = match self.fetch_series(chain_id, metric, window).await {
                Ok(samples) => samples,
                Err(failure) => {
                    report.failures.push(MetricFailure {
                        chain: chain_identifier.clone(),
                        metric,
                        reason: failure.to_string(),
                    });
                    continue;
                }
            };

            match self.writer.write(metric, &chain_identifier, &samples).await {
                Ok(summary) => {
                    report.series_written += 1;
                    report.samples_inserted += summary.inserted;
                    report.samples_updated += summary.updated;
                    report.samples_unchanged += summary.unchanged;
                    report.samples_dropped += summary.dropped;
                    if let Some(latest) = summary.latest {
                        snapshots.insert(metric, latest);
                    }
                }
                Err(e) => {
                    warn!("Failed to store {} for {}: {}", metric, chain_identifier, e);
                    report.failures.push(MetricFailure {
                        chain: chain_identifier.clone(),
                        metric,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if snapshots.is_empty() {
            return;
        }

        let descriptor = ChainDescriptor {
            source: SourceTag::MetricsApi,
            subnet_id: match &record.primary_id {
                PrimaryId::Subnet(subnet) => Some(subnet.clone()),
                PrimaryId::Provisional(_) => None,
            },
            ids: record.ids.clone(),
            descriptive: None,
            live: Some(LiveDataUpdate {
                api_name: None,
                validators: None,
                latest_metrics: snapshots,
            }),
            origin_folder: None,
        };
        match self.store.reconcile(&descriptor, &self.reconciler).await {
            Ok(outcome) if outcome.change != Change::Unchanged => report.snapshots_updated += 1,
            Ok(_) => {}
            Err(e) => warn!("Failed to record latest metrics for {}: {}", chain_identifier, e),
        }
    }

    async fn fetch_series(
        &self,
        chain_id: &str,
        metric: MetricKind,
        window: TimeWindow,
    ) -> Result<Vec<RawSample>, TaskFailure<FetchError>> {
        let mut samples = Vec::new();
        let mut token: Option<String> = None;
        let mut page = 0u32;

        loop {
            page += 1;
            let label = format!("{} {} page {}", chain_id, metric, page);
            let source = &self.source;
            let page_token = token.clone();
            let result = self
                .scheduler
                .enqueue(&label, move || {
                    let page_token = page_token.clone();
                    async move { source.metric_page(chain_id, metric, window, page_token).await }
                })
                .await?;

            debug!("{}: {} samples", label, result.results.len());
            samples.extend(result.results);
            match result.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) if Some(&next) != token.as_ref() => token = Some(next),
                _ => break,
            }
        }
        Ok(samples)
    }
}
