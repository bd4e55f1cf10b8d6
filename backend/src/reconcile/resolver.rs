use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::warn;

use crate::types::{ChainDescriptor, ChainRecord, SourceTag};

/// Identity rules in precedence order. The first rule with any match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    PrimaryId,
    LegacyBridge,
    LedgerId,
    PlatformId,
}

impl MatchRule {
    pub const ORDER: [MatchRule; 4] = [
        MatchRule::PrimaryId,
        MatchRule::LegacyBridge,
        MatchRule::LedgerId,
        MatchRule::PlatformId,
    ];

    fn matches(&self, descriptor: &ChainDescriptor, record: &ChainRecord) -> bool {
        match self {
            MatchRule::PrimaryId => {
                let same_key = descriptor
                    .primary_id()
                    .map_or(false, |id| id.storage_key() == record.storage_key());
                // A listed chain with another numeric id is a sibling chain of the same subnet.
                let sibling = descriptor.source == SourceTag::MetricsApi
                    && matches!(
                        (&descriptor.ids.legacy_numeric_id, &record.ids.legacy_numeric_id),
                        (Some(a), Some(b)) if a != b
                    );
                same_key && !sibling
            }
            MatchRule::LegacyBridge => {
                let same_legacy = matches!(
                    (&descriptor.ids.legacy_numeric_id, &record.ids.legacy_numeric_id),
                    (Some(a), Some(b)) if a == b
                );
                // Two different authoritative subnet ids sharing a numeric id are distinct networks.
                let both_authoritative = descriptor.primary_id().map_or(false, |id| id.is_authoritative())
                    && record.primary_id.is_authoritative();
                same_legacy && !both_authoritative
            }
            MatchRule::LedgerId => matches!(
                (&descriptor.ids.ledger_id, &record.ids.ledger_id),
                (Some(a), Some(b)) if a == b
            ),
            MatchRule::PlatformId => matches!(
                (&descriptor.ids.platform_id, &record.ids.platform_id),
                (Some(a), Some(b)) if a == b
            ),
        }
    }
}

/// Audit trail of one resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutcome {
    pub matched: Option<ChainRecord>,
    pub rule: Option<MatchRule>,
    /// Storage keys of the candidates passed over when the winning rule matched several records.
    pub passed_over: Vec<String>,
}

impl ResolveOutcome {
    pub fn record(&self) -> Option<&ChainRecord> {
        self.matched.as_ref()
    }

    pub fn is_ambiguous(&self) -> bool {
        !self.passed_over.is_empty()
    }
}

/// Candidate preference when a rule matches several records: registry-sourced
/// first, then earliest synced. The storage key makes the order total.
pub fn preference(a: &ChainRecord, b: &ChainRecord) -> Ordering {
    b.is_registry_sourced()
        .cmp(&a.is_registry_sourced())
        .then(a.provenance.last_synced_at.cmp(&b.provenance.last_synced_at))
        .then(a.storage_key().cmp(&b.storage_key()))
}

/// Finds the canonical record an incoming descriptor refers to.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, descriptor: &ChainDescriptor, records: &[ChainRecord]) -> ResolveOutcome {
        for rule in MatchRule::ORDER {
            let mut hits: Vec<&ChainRecord> = records.iter().filter(|r| rule.matches(descriptor, r)).collect();
            if hits.is_empty() {
                continue;
            }

            hits.sort_by(|a, b| preference(a, b));

            let chosen = hits[0].clone();
            let passed_over: Vec<String> = hits[1..].iter().map(|r| r.storage_key()).collect();
            if !passed_over.is_empty() {
                warn!(
                    "Ambiguous identity for {} under rule {:?}: chose {} over {:?}",
                    descriptor.label(),
                    rule,
                    chosen.storage_key(),
                    passed_over
                );
            }

            return ResolveOutcome {
                matched: Some(chosen),
                rule: Some(rule),
                passed_over,
            };
        }

        ResolveOutcome {
            matched: None,
            rule: None,
            passed_over: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LiveData, PrimaryId, Provenance, SecondaryIds, SourceTag};
    use chrono::{Duration, TimeZone, Utc};

    fn record(key: PrimaryId, legacy: Option<&str>, ledger: Option<&str>, source: SourceTag, age_days: i64) -> ChainRecord {
        ChainRecord {
            primary_id: key,
            ids: SecondaryIds {
                legacy_numeric_id: legacy.map(str::to_string),
                ledger_id: ledger.map(str::to_string),
                platform_id: None,
            },
            descriptive: None,
            live: LiveData::default(),
            provenance: Provenance {
                source_tag: source,
                last_synced_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() - Duration::days(age_days),
                origin_folder: None,
            },
        }
    }

    fn api_descriptor(legacy: &str, ledger: Option<&str>) -> ChainDescriptor {
        ChainDescriptor {
            source: SourceTag::MetricsApi,
            subnet_id: None,
            ids: SecondaryIds {
                legacy_numeric_id: Some(legacy.to_string()),
                ledger_id: ledger.map(str::to_string),
                platform_id: None,
            },
            descriptive: None,
            live: None,
            origin_folder: None,
        }
    }

    #[test]
    fn primary_id_match_wins_over_secondary_matches() {
        let records = vec![
            record(PrimaryId::Subnet("OTHER".into()), Some("1"), None, SourceTag::Registry, 0),
            record(PrimaryId::Provisional("evm:1".into()), Some("1"), None, SourceTag::MetricsApi, 0),
        ];
        let outcome = IdentityResolver::new().resolve(&api_descriptor("1", None), &records);
        assert_eq!(outcome.rule, Some(MatchRule::PrimaryId));
        assert_eq!(outcome.record().unwrap().storage_key(), "provisional:evm:1");
        assert!(!outcome.is_ambiguous());
    }

    #[test]
    fn bridge_refuses_two_different_authoritative_ids() {
        let records = vec![record(PrimaryId::Subnet("SUBNET-A".into()), Some("7"), None, SourceTag::Registry, 0)];
        let mut descriptor = api_descriptor("7", None);
        descriptor.source = SourceTag::Registry;
        descriptor.subnet_id = Some("SUBNET-B".into());

        let outcome = IdentityResolver::new().resolve(&descriptor, &records);
        assert!(outcome.record().is_none());

        // without its own subnet id the descriptor bridges onto the registry record
        let outcome = IdentityResolver::new().resolve(&api_descriptor("7", None), &records);
        assert_eq!(outcome.rule, Some(MatchRule::LegacyBridge));
    }

    #[test]
    fn ambiguity_prefers_registry_then_earliest_sync() {
        let records = vec![
            record(PrimaryId::Provisional("ledger:x1".into()), None, Some("L"), SourceTag::MetricsApi, 30),
            record(PrimaryId::Subnet("NEW".into()), None, Some("L"), SourceTag::Registry, 1),
            record(PrimaryId::Subnet("OLD".into()), None, Some("L"), SourceTag::Registry, 5),
        ];
        let descriptor = ChainDescriptor {
            source: SourceTag::MetricsApi,
            subnet_id: None,
            ids: SecondaryIds {
                legacy_numeric_id: None,
                ledger_id: Some("L".into()),
                platform_id: None,
            },
            descriptive: None,
            live: None,
            origin_folder: None,
        };
        // the descriptor's own provisional key is ledger:L, so rule 1 misses and rule 3 decides
        let outcome = IdentityResolver::new().resolve(&descriptor, &records);
        assert_eq!(outcome.rule, Some(MatchRule::LedgerId));
        assert_eq!(outcome.record().unwrap().storage_key(), "OLD");
        assert_eq!(outcome.passed_over, vec!["NEW".to_string(), "provisional:ledger:x1".to_string()]);
    }

    #[test]
    fn sibling_chain_of_a_subnet_does_not_match_by_primary_id() {
        let records = vec![record(PrimaryId::Subnet("SUBNET-S".into()), Some("100"), None, SourceTag::MetricsApi, 0)];
        let mut sibling = api_descriptor("200", None);
        sibling.subnet_id = Some("SUBNET-S".into());
        assert!(IdentityResolver::new().resolve(&sibling, &records).record().is_none());

        let mut same = api_descriptor("100", None);
        same.subnet_id = Some("SUBNET-S".into());
        assert_eq!(IdentityResolver::new().resolve(&same, &records).rule, Some(MatchRule::PrimaryId));
    }

    #[test]
    fn no_match_returns_none() {
        let records = vec![record(PrimaryId::Subnet("A".into()), Some("1"), None, SourceTag::Registry, 0)];
        let outcome = IdentityResolver::new().resolve(&api_descriptor("2", Some("zz")), &records);
        assert!(outcome.record().is_none());
        assert!(outcome.rule.is_none());
    }
}
