//! Identity resolution, ownership-aware merging and duplicate auditing of chain records.

pub mod auditor;
pub mod merge;
pub mod resolver;

pub use auditor::{AuditReport, AuditResolution, Cluster, ClusterReason, DuplicateAuditor};
pub use merge::{Change, MergeEngine, MergeResult};
pub use resolver::{preference, IdentityResolver, MatchRule, ResolveOutcome};

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use tracing::warn;

use crate::types::{ChainDescriptor, ChainRecord, PrimaryId};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("descriptor {0} carries no usable identifier")]
    MissingIdentity(String),
}

/// Keys a store uses to preselect the records a descriptor could resolve to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateKeys {
    pub storage_key: Option<String>,
    pub legacy_numeric_id: Option<String>,
    pub ledger_id: Option<String>,
    pub platform_id: Option<String>,
}

impl CandidateKeys {
    pub fn for_descriptor(descriptor: &ChainDescriptor) -> Self {
        Self {
            storage_key: descriptor.primary_id().map(|id| id.storage_key()),
            legacy_numeric_id: descriptor.ids.legacy_numeric_id.clone(),
            ledger_id: descriptor.ids.ledger_id.clone(),
            platform_id: descriptor.ids.platform_id.clone(),
        }
    }

    pub fn matches(&self, record: &ChainRecord) -> bool {
        fn eq(a: &Option<String>, b: &Option<String>) -> bool {
            matches!((a, b), (Some(a), Some(b)) if a == b)
        }
        self.storage_key.as_deref() == Some(record.storage_key().as_str())
            || eq(&self.legacy_numeric_id, &record.ids.legacy_numeric_id)
            || eq(&self.ledger_id, &record.ids.ledger_id)
            || eq(&self.platform_id, &record.ids.platform_id)
    }
}

/// What a store must write for one descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan {
    /// Storage key the write filters on; `None` means insert.
    pub previous_key: Option<String>,
    pub record: ChainRecord,
    pub change: Change,
    pub resolution: ResolveOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub storage_key: String,
    /// Key the record was stored under before this write, when it changed.
    pub previous_key: Option<String>,
    pub change: Change,
    pub rule: Option<MatchRule>,
    pub ambiguous: bool,
}

/// Resolve followed by merge, evaluated by a store inside its atomic write.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    resolver: IdentityResolver,
    engine: MergeEngine,
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            resolver: IdentityResolver::new(),
            engine: MergeEngine::new(),
        }
    }

    pub fn plan(
        &self,
        candidates: &[ChainRecord],
        incoming: &ChainDescriptor,
        now: DateTime<Utc>,
    ) -> Result<ReconcilePlan, ReconcileError> {
        let resolution = self.resolver.resolve(incoming, candidates);
        let existing = resolution.record();
        let existing_key = existing.map(|r| r.storage_key());

        // A subnet key already held by another record is never taken over.
        let incoming = match incoming.primary_id() {
            Some(PrimaryId::Subnet(subnet))
                if existing_key.as_deref() != Some(subnet.as_str())
                    && candidates.iter().any(|c| c.storage_key() == subnet) =>
            {
                warn!(
                    "Primary id {} is held by another record; keeping {} apart",
                    subnet,
                    incoming.label()
                );
                Cow::Owned(incoming.without_subnet())
            }
            _ => Cow::Borrowed(incoming),
        };
        let merged = self.engine.merge(existing, &incoming, now)?;

        Ok(ReconcilePlan {
            previous_key: existing_key,
            record: merged.record,
            change: merged.change,
            resolution,
        })
    }
}

impl ReconcilePlan {
    pub fn outcome(&self) -> ReconcileOutcome {
        let storage_key = self.record.storage_key();
        ReconcileOutcome {
            previous_key: self.previous_key.clone().filter(|previous| *previous != storage_key),
            storage_key,
            change: self.change,
            rule: self.resolution.rule,
            ambiguous: self.resolution.is_ambiguous(),
        }
    }
}
