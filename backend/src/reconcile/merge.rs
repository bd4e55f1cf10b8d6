use chrono::{DateTime, Utc};
use tracing::warn;

use super::ReconcileError;
use crate::types::{ChainDescriptor, ChainRecord, LiveData, PrimaryId, Provenance, SourceTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub record: ChainRecord,
    pub change: Change,
}

/// Applies per-source field ownership when folding a descriptor into a record.
///
/// Descriptive fields belong to the registry, live data to the metrics API and
/// identifiers to nobody: they are only ever unioned. A merge that changes no
/// content returns the existing record untouched, timestamps included.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn merge(
        &self,
        existing: Option<&ChainRecord>,
        incoming: &ChainDescriptor,
        now: DateTime<Utc>,
    ) -> Result<MergeResult, ReconcileError> {
        match existing {
            None => self.create(incoming, now).map(|record| MergeResult {
                record,
                change: Change::Created,
            }),
            Some(existing) => Ok(self.update(existing, incoming, now)),
        }
    }

    fn create(&self, incoming: &ChainDescriptor, now: DateTime<Utc>) -> Result<ChainRecord, ReconcileError> {
        let primary_id = incoming
            .primary_id()
            .ok_or_else(|| ReconcileError::MissingIdentity(incoming.label()))?;

        let mut live = LiveData::default();
        let mut descriptive = None;
        let mut origin_folder = None;
        match incoming.source {
            SourceTag::Registry => {
                descriptive = incoming.descriptive.clone();
                origin_folder = incoming.origin_folder.clone();
            }
            SourceTag::MetricsApi => {
                if let Some(update) = &incoming.live {
                    live.apply(update);
                }
            }
        }

        Ok(ChainRecord {
            primary_id,
            ids: incoming.ids.clone(),
            descriptive,
            live,
            provenance: Provenance {
                source_tag: incoming.source,
                last_synced_at: now,
                origin_folder,
            },
        })
    }

    fn update(&self, existing: &ChainRecord, incoming: &ChainDescriptor, now: DateTime<Utc>) -> MergeResult {
        let mut candidate = existing.clone();
        candidate.ids = existing.ids.union(&incoming.ids);

        if let Some(PrimaryId::Subnet(subnet)) = incoming.primary_id() {
            match &existing.primary_id {
                PrimaryId::Provisional(_) => candidate.primary_id = PrimaryId::Subnet(subnet),
                PrimaryId::Subnet(current) if *current != subnet => {
                    warn!(
                        "Keeping primary id {} for {}; incoming subnet id {} differs",
                        current,
                        incoming.label(),
                        subnet
                    );
                }
                PrimaryId::Subnet(_) => {}
            }
        }

        match incoming.source {
            SourceTag::Registry => {
                candidate.descriptive = incoming.descriptive.clone();
                candidate.provenance.origin_folder = incoming.origin_folder.clone();
                candidate.provenance.source_tag = SourceTag::Registry;
            }
            SourceTag::MetricsApi => {
                if let Some(update) = &incoming.live {
                    candidate.live.apply(update);
                }
            }
        }

        if candidate == *existing {
            return MergeResult {
                record: existing.clone(),
                change: Change::Unchanged,
            };
        }

        candidate.provenance.last_synced_at = now;
        MergeResult {
            record: candidate,
            change: Change::Updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Descriptive, LiveDataUpdate, MetricKind, MetricSnapshot, SecondaryIds, Validator};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn registry(subnet: &str, legacy: Option<&str>, name: &str) -> ChainDescriptor {
        ChainDescriptor {
            source: SourceTag::Registry,
            subnet_id: Some(subnet.to_string()),
            ids: SecondaryIds {
                legacy_numeric_id: legacy.map(str::to_string),
                ledger_id: None,
                platform_id: None,
            },
            descriptive: Some(Descriptive {
                name: name.to_string(),
                categories: vec!["defi".to_string()],
                ..Default::default()
            }),
            live: None,
            origin_folder: Some(name.to_lowercase()),
        }
    }

    fn metrics(legacy: &str, validators: &[&str]) -> ChainDescriptor {
        ChainDescriptor {
            source: SourceTag::MetricsApi,
            subnet_id: None,
            ids: SecondaryIds {
                legacy_numeric_id: Some(legacy.to_string()),
                ledger_id: Some(format!("ledger-{}", legacy)),
                platform_id: None,
            },
            descriptive: None,
            live: Some(LiveDataUpdate {
                api_name: Some(format!("api-{}", legacy)),
                validators: Some(
                    validators
                        .iter()
                        .map(|v| Validator {
                            node_id: v.to_string(),
                            weight: Some(1),
                        })
                        .collect(),
                ),
                latest_metrics: Default::default(),
            }),
            origin_folder: None,
        }
    }

    #[test]
    fn remerging_identical_input_is_a_no_op() {
        let engine = MergeEngine::new();
        let incoming = registry("SUBNET-A", Some("43114"), "Alpha");
        let first = engine.merge(None, &incoming, t0()).unwrap();
        assert_eq!(first.change, Change::Created);

        let second = engine.merge(Some(&first.record), &incoming, t0() + Duration::hours(6)).unwrap();
        assert_eq!(second.change, Change::Unchanged);
        assert_eq!(second.record, first.record);
        assert_eq!(
            serde_json::to_vec(&second.record).unwrap(),
            serde_json::to_vec(&first.record).unwrap()
        );
    }

    #[test]
    fn metrics_sync_only_touches_live_data_and_identifiers() {
        let engine = MergeEngine::new();
        let base = engine.merge(None, &registry("SUBNET-A", Some("43114"), "Alpha"), t0()).unwrap().record;

        let merged = engine
            .merge(Some(&base), &metrics("43114", &["NodeID-2", "NodeID-1"]), t0() + Duration::hours(1))
            .unwrap();
        assert_eq!(merged.change, Change::Updated);
        let record = merged.record;
        assert_eq!(record.descriptive, base.descriptive);
        assert_eq!(record.provenance.source_tag, SourceTag::Registry);
        assert_eq!(record.provenance.origin_folder, base.provenance.origin_folder);
        assert_eq!(record.primary_id, base.primary_id);
        assert_eq!(record.live.validators[0].node_id, "NodeID-1");
        assert_eq!(record.ids.ledger_id.as_deref(), Some("ledger-43114"));
        assert_eq!(record.provenance.last_synced_at, t0() + Duration::hours(1));
    }

    #[test]
    fn registry_sync_only_touches_descriptive_data_and_upgrades_provisional_id() {
        let engine = MergeEngine::new();
        let mut api = metrics("43114", &["NodeID-1"]);
        if let Some(live) = api.live.as_mut() {
            live.latest_metrics.insert(
                MetricKind::TxCount,
                MetricSnapshot {
                    timestamp: 1_700_000_000,
                    value: 10.0,
                },
            );
        }
        let base = engine.merge(None, &api, t0()).unwrap().record;
        assert_eq!(base.primary_id, PrimaryId::Provisional("evm:43114".to_string()));
        assert!(base.descriptive.is_none());

        let record = engine
            .merge(Some(&base), &registry("SUBNET-A", Some("43114"), "Alpha"), t0())
            .unwrap()
            .record;
        assert_eq!(record.primary_id, PrimaryId::Subnet("SUBNET-A".to_string()));
        assert_eq!(record.live, base.live);
        assert_eq!(record.descriptive.as_ref().map(|d| d.name.as_str()), Some("Alpha"));
        assert_eq!(record.provenance.source_tag, SourceTag::Registry);
        assert_eq!(record.ids.ledger_id.as_deref(), Some("ledger-43114"));
    }

    #[test]
    fn omitted_identifiers_are_retained() {
        let engine = MergeEngine::new();
        let base = engine.merge(None, &registry("SUBNET-A", Some("43114"), "Alpha"), t0()).unwrap().record;
        let without_ids = registry("SUBNET-A", None, "Alpha");
        let merged = engine.merge(Some(&base), &without_ids, t0()).unwrap();
        assert_eq!(merged.change, Change::Unchanged);
        assert_eq!(merged.record.ids.legacy_numeric_id.as_deref(), Some("43114"));
    }

    #[test]
    fn descriptor_without_any_identifier_is_rejected() {
        let mut descriptor = metrics("1", &[]);
        descriptor.ids = SecondaryIds::default();
        let err = MergeEngine::new().merge(None, &descriptor, t0()).unwrap_err();
        assert!(matches!(err, ReconcileError::MissingIdentity(_)));
    }
}
