pub mod chain_store;
pub mod migrations;
pub mod repository;
pub mod series;

pub use chain_store::{ChainRecordStore, InMemoryChainStore};
pub use migrations::MigrationRunner;
pub use repository::{connect, PgChainRepository, PgSampleRepository};
pub use series::{InMemorySampleStore, MetricSampleStore, MetricSeriesWriter, SeriesWriteSummary, UpsertCounts};

use crate::reconcile::ReconcileError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("corrupt row {key}: {reason}")]
    Corrupt { key: String, reason: String },
}
