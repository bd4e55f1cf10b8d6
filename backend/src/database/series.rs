use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::StoreError;
use crate::metrics_api::RawSample;
use crate::types::{MetricKind, MetricSample, MetricSnapshot};

/// 2015-01-01T00:00:00Z; anything earlier is treated as garbage.
pub const MIN_SAMPLE_TIMESTAMP: i64 = 1_420_070_400;
/// Tolerated clock skew for samples stamped in the future.
pub const MAX_FUTURE_SKEW_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// One collection per metric kind, unique on `(chain_identifier, timestamp)`.
#[async_trait]
pub trait MetricSampleStore: Send + Sync {
    /// Idempotent upsert; re-applying an identical sample changes nothing.
    async fn upsert_samples(
        &self,
        metric: MetricKind,
        chain_identifier: &str,
        samples: &[(i64, f64)],
    ) -> Result<UpsertCounts, StoreError>;

    async fn range(
        &self,
        metric: MetricKind,
        chain_identifier: &str,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<MetricSample>, StoreError>;

    /// Moves a series to a new chain identifier. Samples already stored under
    /// `to` win over moved ones with the same timestamp.
    async fn rekey(&self, metric: MetricKind, from: &str, to: &str) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemorySampleStore {
    series: DashMap<(MetricKind, String), BTreeMap<i64, MetricSample>>,
}

impl InMemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricSampleStore for InMemorySampleStore {
    async fn upsert_samples(
        &self,
        metric: MetricKind,
        chain_identifier: &str,
        samples: &[(i64, f64)],
    ) -> Result<UpsertCounts, StoreError> {
        let now = Utc::now();
        let mut counts = UpsertCounts::default();
        let mut series = self.series.entry((metric, chain_identifier.to_string())).or_default();

        for &(timestamp, value) in samples {
            match series.get_mut(&timestamp) {
                Some(existing) if existing.value.to_bits() == value.to_bits() => counts.unchanged += 1,
                Some(existing) => {
                    existing.value = value;
                    existing.last_updated = now;
                    counts.updated += 1;
                }
                None => {
                    series.insert(
                        timestamp,
                        MetricSample {
                            chain_identifier: chain_identifier.to_string(),
                            timestamp,
                            value,
                            last_updated: now,
                        },
                    );
                    counts.inserted += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn range(
        &self,
        metric: MetricKind,
        chain_identifier: &str,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let key = (metric, chain_identifier.to_string());
        let Some(series) = self.series.get(&key) else {
            return Ok(Vec::new());
        };
        let from = from.unwrap_or(i64::MIN);
        let to = to.unwrap_or(i64::MAX);
        if from > to {
            return Ok(Vec::new());
        }
        Ok(series.range(from..=to).map(|(_, sample)| sample.clone()).collect())
    }

    async fn rekey(&self, metric: MetricKind, from: &str, to: &str) -> Result<u64, StoreError> {
        if from == to {
            return Ok(0);
        }
        let Some((_, moved)) = self.series.remove(&(metric, from.to_string())) else {
            return Ok(0);
        };
        let mut target = self.series.entry((metric, to.to_string())).or_default();
        let mut count = 0;
        for (timestamp, mut sample) in moved {
            if let std::collections::btree_map::Entry::Vacant(slot) = target.entry(timestamp) {
                sample.chain_identifier = to.to_string();
                slot.insert(sample);
                count += 1;
            }
        }
        Ok(count)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesWriteSummary {
    pub accepted: usize,
    pub dropped: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Newest accepted sample of this write.
    pub latest: Option<MetricSnapshot>,
}

/// Validates fetched samples and writes them through to a [`MetricSampleStore`].
#[derive(Clone)]
pub struct MetricSeriesWriter {
    store: Arc<dyn MetricSampleStore>,
}

impl MetricSeriesWriter {
    pub fn new(store: Arc<dyn MetricSampleStore>) -> Self {
        Self { store }
    }

    /// Moves every metric series of a chain that changed storage key.
    pub async fn rekey_chain(&self, from: &str, to: &str) -> Result<u64, StoreError> {
        let mut moved = 0;
        for metric in MetricKind::ALL {
            moved += self.store.rekey(metric, from, to).await?;
        }
        if moved > 0 {
            info!("Moved {} metric samples from {} to {}", moved, from, to);
        }
        Ok(moved)
    }

    /// Malformed samples are dropped and counted; they never fail the write.
    pub async fn write(
        &self,
        metric: MetricKind,
        chain_identifier: &str,
        raw: &[RawSample],
    ) -> Result<SeriesWriteSummary, StoreError> {
        let latest_allowed = Utc::now().timestamp() + MAX_FUTURE_SKEW_SECS;
        let mut summary = SeriesWriteSummary::default();
        let mut accepted: BTreeMap<i64, f64> = BTreeMap::new();

        for sample in raw {
            match (sample.timestamp_secs(), sample.numeric_value()) {
                (Some(ts), Some(value)) if (MIN_SAMPLE_TIMESTAMP..=latest_allowed).contains(&ts) => {
                    // later duplicates of a timestamp win
                    accepted.insert(ts, value);
                }
                _ => {
                    debug!("Dropping malformed {} sample for {}: {:?}", metric, chain_identifier, sample);
                    summary.dropped += 1;
                }
            }
        }

        summary.accepted = accepted.len();
        summary.latest = accepted
            .iter()
            .next_back()
            .map(|(&timestamp, &value)| MetricSnapshot { timestamp, value });

        if accepted.is_empty() {
            return Ok(summary);
        }

        let samples: Vec<(i64, f64)> = accepted.into_iter().collect();
        let counts = self.store.upsert_samples(metric, chain_identifier, &samples).await?;
        summary.inserted = counts.inserted;
        summary.updated = counts.updated;
        summary.unchanged = counts.unchanged;
        Ok(summary)
    }
}
