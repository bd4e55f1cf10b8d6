//! Sync passes that feed the canonical record store from both upstream sources.

pub mod background_jobs;
pub mod chain_list_sync;
pub mod metric_fetcher;
pub mod registry_sync;

pub use background_jobs::{BackgroundJobManager, Job, JobStatus};
pub use chain_list_sync::ChainListSync;
pub use metric_fetcher::{MetricBatchReport, MetricFailure, MetricFetcher};
pub use registry_sync::RegistrySync;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::database::{ChainRecordStore, MetricSeriesWriter, StoreError};
use crate::reconcile::{Change, ReconcileOutcome, Reconciler};
use crate::registry::RegistryError;
use crate::types::ChainDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid cron expression for {job}: {reason}")]
    InvalidSchedule { job: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub label: String,
    pub reason: String,
}

/// Outcome counts of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_files: Vec<String>,
    pub ambiguous: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn record(&mut self, outcome: &ReconcileOutcome) {
        self.processed += 1;
        match outcome.change {
            Change::Created => self.created += 1,
            Change::Updated => self.updated += 1,
            Change::Unchanged => self.unchanged += 1,
        }
        if outcome.ambiguous {
            self.ambiguous += 1;
        }
    }

    pub fn fail(&mut self, label: impl Into<String>, reason: impl ToString) {
        self.failures.push(SyncFailure {
            label: label.into(),
            reason: reason.to_string(),
        });
    }

    /// Number of records written by the pass.
    pub fn writes(&self) -> usize {
        self.created + self.updated
    }
}

/// Reconciles descriptors one by one; a failing descriptor is recorded and skipped.
/// Metric series follow a record whose storage key changed.
pub(crate) async fn reconcile_all(
    store: &Arc<dyn ChainRecordStore>,
    series: Option<&MetricSeriesWriter>,
    reconciler: &Reconciler,
    descriptors: &[ChainDescriptor],
    report: &mut SyncReport,
) {
    for descriptor in descriptors {
        match store.reconcile(descriptor, reconciler).await {
            Ok(outcome) => {
                report.record(&outcome);
                if let (Some(series), Some(previous)) = (series, &outcome.previous_key) {
                    if let Err(e) = series.rekey_chain(previous, &outcome.storage_key).await {
                        warn!("Failed to move metric series {} -> {}: {}", previous, outcome.storage_key, e);
                        report.fail(outcome.storage_key.clone(), e);
                    }
                }
            }
            Err(e) => {
                warn!("Failed to reconcile {}: {}", descriptor.label(), e);
                report.fail(descriptor.label(), e);
            }
        }
    }
}
