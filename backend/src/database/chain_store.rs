use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::StoreError;
use crate::reconcile::{CandidateKeys, Change, ReconcileOutcome, Reconciler};
use crate::types::{ChainDescriptor, ChainRecord};

/// The canonical chain record collection, addressed by primary id storage key.
#[async_trait]
pub trait ChainRecordStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ChainRecord>, StoreError>;

    async fn get(&self, storage_key: &str) -> Result<Option<ChainRecord>, StoreError>;

    /// Resolves, merges and writes `incoming` as one atomic filter-and-upsert.
    /// Unchanged merges perform no write.
    async fn reconcile(&self, incoming: &ChainDescriptor, reconciler: &Reconciler) -> Result<ReconcileOutcome, StoreError>;

    async fn delete(&self, storage_keys: &[String]) -> Result<u64, StoreError>;
}

/// Map-backed store; the write lock spans resolve, merge and write.
#[derive(Debug, Default)]
pub struct InMemoryChainStore {
    records: RwLock<BTreeMap<String, ChainRecord>>,
    writes: AtomicU64,
}

impl InMemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds records as-is, bypassing identity resolution.
    pub fn with_records(records: Vec<ChainRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.storage_key(), r)).collect();
        Self {
            records: RwLock::new(map),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of record writes performed since construction.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChainRecordStore for InMemoryChainStore {
    async fn list(&self) -> Result<Vec<ChainRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get(&self, storage_key: &str) -> Result<Option<ChainRecord>, StoreError> {
        Ok(self.records.read().await.get(storage_key).cloned())
    }

    async fn reconcile(&self, incoming: &ChainDescriptor, reconciler: &Reconciler) -> Result<ReconcileOutcome, StoreError> {
        let mut records = self.records.write().await;

        let keys = CandidateKeys::for_descriptor(incoming);
        let candidates: Vec<ChainRecord> = records.values().filter(|r| keys.matches(r)).cloned().collect();
        let plan = reconciler.plan(&candidates, incoming, Utc::now())?;

        if plan.change != Change::Unchanged {
            let key = plan.record.storage_key();
            if let Some(previous) = &plan.previous_key {
                if *previous != key {
                    debug!("Re-keying record {} -> {}", previous, key);
                    records.remove(previous);
                }
            }
            records.insert(key, plan.record.clone());
            self.writes.fetch_add(1, Ordering::Relaxed);
        }

        Ok(plan.outcome())
    }

    async fn delete(&self, storage_keys: &[String]) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let deleted = storage_keys.iter().filter(|k| records.remove(k.as_str()).is_some()).count();
        if deleted > 0 {
            self.writes.fetch_add(deleted as u64, Ordering::Relaxed);
        }
        Ok(deleted as u64)
    }
}
