use std::sync::Arc;
use tracing::info;

use super::{reconcile_all, SyncError, SyncReport};
use crate::database::{ChainRecordStore, MetricSeriesWriter};
use crate::reconcile::Reconciler;
use crate::registry::RegistryLoader;

/// Loads the registry directory wholesale and reconciles every descriptor.
pub struct RegistrySync {
    loader: RegistryLoader,
    store: Arc<dyn ChainRecordStore>,
    series: Option<MetricSeriesWriter>,
    reconciler: Reconciler,
}

impl RegistrySync {
    pub fn new(loader: RegistryLoader, store: Arc<dyn ChainRecordStore>) -> Self {
        Self {
            loader,
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

    /// A missing directory or an empty registry aborts the pass before any write.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let load = self.loader.load().await?;
        let mut report = SyncReport {
            skipped_files: load.skipped,
            ..Default::default()
        };

        reconcile_all(&self.store, self.series.as_ref(), &self.reconciler, &load.descriptors, &mut report).await;

        info!(
            "Registry sync: {} processed, {} created, {} updated, {} unchanged, {} skipped files, {} failures",
            report.processed,
            report.created,
            report.updated,
            report.unchanged,
            report.skipped_files.len(),
            report.failures.len()
        );
        Ok(report)
    }
}
