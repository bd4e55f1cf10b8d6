use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which upstream a descriptor (or the last descriptive write) came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Registry,
    MetricsApi,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Registry => "registry",
            SourceTag::MetricsApi => "metrics_api",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PROVISIONAL_PREFIX: &str = "provisional:";

/// Stable key of a canonical record.
///
/// `Subnet` ids are authoritative. `Provisional` ids are seeded from a
/// secondary identifier when the writing source had no subnet id, and are
/// upgraded in place once one becomes known.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PrimaryId {
    Subnet(String),
    Provisional(String),
}

impl PrimaryId {
    pub fn storage_key(&self) -> String {
        match self {
            PrimaryId::Subnet(id) => id.clone(),
            PrimaryId::Provisional(seed) => format!("{}{}", PROVISIONAL_PREFIX, seed),
        }
    }

    pub fn from_storage_key(key: &str) -> Self {
        match key.strip_prefix(PROVISIONAL_PREFIX) {
            Some(seed) => PrimaryId::Provisional(seed.to_string()),
            None => PrimaryId::Subnet(key.to_string()),
        }
    }

    pub fn is_authoritative(&self) -> bool {
        matches!(self, PrimaryId::Subnet(_))
    }
}

impl fmt::Display for PrimaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Identifiers used only for cross-source correlation. None of them is unique on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecondaryIds {
    pub legacy_numeric_id: Option<String>,
    pub ledger_id: Option<String>,
    pub platform_id: Option<String>,
}

impl SecondaryIds {
    /// Field-wise union. A known identifier is never replaced or cleared.
    pub fn union(&self, other: &SecondaryIds) -> SecondaryIds {
        SecondaryIds {
            legacy_numeric_id: self.legacy_numeric_id.clone().or_else(|| other.legacy_numeric_id.clone()),
            ledger_id: self.ledger_id.clone().or_else(|| other.ledger_id.clone()),
            platform_id: self.platform_id.clone().or_else(|| other.platform_id.clone()),
        }
    }

    /// Seed for a provisional primary id, best identifier first.
    pub fn provisional_seed(&self) -> Option<String> {
        if let Some(id) = &self.legacy_numeric_id {
            return Some(format!("evm:{}", id));
        }
        if let Some(id) = &self.ledger_id {
            return Some(format!("ledger:{}", id));
        }
        self.platform_id.as_ref().map(|id| format!("platform:{}", id))
    }

    /// Drops blank strings so that `Some("")` never acts as a correlation key.
    pub fn normalized(self) -> SecondaryIds {
        fn clean(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        SecondaryIds {
            legacy_numeric_id: clean(self.legacy_numeric_id),
            ledger_id: clean(self.ledger_id),
            platform_id: clean(self.platform_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocialLink {
    pub name: String,
    pub url: String,
}

/// One chain of a registry network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainEntry {
    pub chain_name: String,
    pub evm_chain_id: Option<String>,
    pub blockchain_id: Option<String>,
    pub platform_chain_id: Option<String>,
    pub rpc_urls: Vec<String>,
}

/// Fields owned by the registry source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Descriptive {
    pub name: String,
    pub description: Option<String>,
    pub website: Option<String>,
    pub socials: Vec<SocialLink>,
    pub categories: Vec<String>,
    pub rpc_urls: Vec<String>,
    pub chains: Vec<ChainEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Validator {
    pub node_id: String,
    pub weight: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricSnapshot {
    pub timestamp: i64,
    pub value: f64,
}

/// Fields owned by the metrics-API source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LiveData {
    pub api_name: Option<String>,
    pub validators: Vec<Validator>,
    pub latest_metrics: BTreeMap<MetricKind, MetricSnapshot>,
}

/// Partial live-data write. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveDataUpdate {
    pub api_name: Option<String>,
    pub validators: Option<Vec<Validator>>,
    pub latest_metrics: BTreeMap<MetricKind, MetricSnapshot>,
}

impl LiveData {
    pub fn apply(&mut self, update: &LiveDataUpdate) {
        if let Some(name) = &update.api_name {
            self.api_name = Some(name.clone());
        }
        if let Some(validators) = &update.validators {
            let mut validators = validators.clone();
            validators.sort_by(|a, b| a.node_id.cmp(&b.node_id));
            self.validators = validators;
        }
        for (kind, snapshot) in &update.latest_metrics {
            self.latest_metrics.insert(*kind, *snapshot);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    /// Source of the last descriptive write.
    pub source_tag: SourceTag,
    /// Time of the last merge that changed the record.
    pub last_synced_at: DateTime<Utc>,
    pub origin_folder: Option<String>,
}

/// The canonical per-network record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainRecord {
    pub primary_id: PrimaryId,
    pub ids: SecondaryIds,
    pub descriptive: Option<Descriptive>,
    pub live: LiveData,
    pub provenance: Provenance,
}

impl ChainRecord {
    pub fn storage_key(&self) -> String {
        self.primary_id.storage_key()
    }

    pub fn display_name(&self) -> String {
        self.descriptive
            .as_ref()
            .map(|d| d.name.clone())
            .or_else(|| self.live.api_name.clone())
            .unwrap_or_else(|| self.storage_key())
    }

    pub fn is_registry_sourced(&self) -> bool {
        self.provenance.source_tag == SourceTag::Registry
    }
}

/// A chain description as delivered by one source, before reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainDescriptor {
    pub source: SourceTag,
    pub subnet_id: Option<String>,
    pub ids: SecondaryIds,
    pub descriptive: Option<Descriptive>,
    pub live: Option<LiveDataUpdate>,
    pub origin_folder: Option<String>,
}

impl ChainDescriptor {
    /// The primary id this descriptor would seed a new record with.
    pub fn primary_id(&self) -> Option<PrimaryId> {
        match self.subnet_id.as_deref().map(str::trim) {
            Some(subnet) if !subnet.is_empty() => Some(PrimaryId::Subnet(subnet.to_string())),
            _ => self.ids.provisional_seed().map(PrimaryId::Provisional),
        }
    }

    /// Same descriptor seeding a provisional id instead of its subnet id.
    pub fn without_subnet(&self) -> ChainDescriptor {
        ChainDescriptor {
            subnet_id: None,
            ..self.clone()
        }
    }

    pub fn label(&self) -> String {
        self.descriptive
            .as_ref()
            .map(|d| d.name.clone())
            .or_else(|| self.live.as_ref().and_then(|l| l.api_name.clone()))
            .or_else(|| self.primary_id().map(|p| p.storage_key()))
            .unwrap_or_else(|| "<unidentified>".to_string())
    }
}

/// Metric series collected per chain. Each kind is its own sample collection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    ActiveAddresses,
    TxCount,
    GasUsed,
    AvgTps,
    MaxTps,
    FeesPaid,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::ActiveAddresses,
        MetricKind::TxCount,
        MetricKind::GasUsed,
        MetricKind::AvgTps,
        MetricKind::MaxTps,
        MetricKind::FeesPaid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::ActiveAddresses => "active_addresses",
            MetricKind::TxCount => "tx_count",
            MetricKind::GasUsed => "gas_used",
            MetricKind::AvgTps => "avg_tps",
            MetricKind::MaxTps => "max_tps",
            MetricKind::FeesPaid => "fees_paid",
        }
    }

    /// Path segment used by the metrics API.
    pub fn api_name(&self) -> &'static str {
        match self {
            MetricKind::ActiveAddresses => "activeAddresses",
            MetricKind::TxCount => "txCount",
            MetricKind::GasUsed => "gasUsed",
            MetricKind::AvgTps => "avgTps",
            MetricKind::MaxTps => "maxTps",
            MetricKind::FeesPaid => "feesPaid",
        }
    }

    pub fn table_name(&self) -> String {
        format!("metric_{}", self.as_str())
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s || kind.api_name() == s)
            .ok_or_else(|| format!("unknown metric: {}", s))
    }
}

/// One stored point of a metric series, unique per `(chain_identifier, timestamp)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub chain_identifier: String,
    pub timestamp: i64,
    pub value: f64,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisional_ids_round_trip_through_storage_key() {
        let id = PrimaryId::Provisional("evm:43114".to_string());
        assert_eq!(id.storage_key(), "provisional:evm:43114");
        assert_eq!(PrimaryId::from_storage_key(&id.storage_key()), id);

        let subnet = PrimaryId::Subnet("SUBNET-A".to_string());
        assert_eq!(PrimaryId::from_storage_key("SUBNET-A"), subnet);
    }

    #[test]
    fn union_never_drops_known_identifiers() {
        let known = SecondaryIds {
            legacy_numeric_id: Some("43114".to_string()),
            ledger_id: Some("2q9e".to_string()),
            platform_id: None,
        };
        let later = SecondaryIds {
            legacy_numeric_id: None,
            ledger_id: Some("other".to_string()),
            platform_id: Some("P-1".to_string()),
        };
        let merged = known.union(&later);
        assert_eq!(merged.legacy_numeric_id.as_deref(), Some("43114"));
        assert_eq!(merged.ledger_id.as_deref(), Some("2q9e"));
        assert_eq!(merged.platform_id.as_deref(), Some("P-1"));
    }

    #[test]
    fn descriptor_prefers_subnet_over_provisional_seed() {
        let mut descriptor = ChainDescriptor {
            source: SourceTag::MetricsApi,
            subnet_id: None,
            ids: SecondaryIds {
                legacy_numeric_id: None,
                ledger_id: Some("abc".to_string()),
                platform_id: None,
            },
            descriptive: None,
            live: None,
            origin_folder: None,
        };
        assert_eq!(descriptor.primary_id(), Some(PrimaryId::Provisional("ledger:abc".to_string())));

        descriptor.subnet_id = Some("  ".to_string());
        assert_eq!(descriptor.primary_id(), Some(PrimaryId::Provisional("ledger:abc".to_string())));

        descriptor.subnet_id = Some("SUBNET-B".to_string());
        assert_eq!(descriptor.primary_id(), Some(PrimaryId::Subnet("SUBNET-B".to_string())));
    }

    #[test]
    fn metric_kind_parses_both_spellings() {
        assert_eq!("tx_count".parse::<MetricKind>(), Ok(MetricKind::TxCount));
        assert_eq!("activeAddresses".parse::<MetricKind>(), Ok(MetricKind::ActiveAddresses));
        assert!("blocks".parse::<MetricKind>().is_err());
        assert_eq!(MetricKind::FeesPaid.table_name(), "metric_fees_paid");
    }
}
