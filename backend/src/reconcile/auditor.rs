//! Offline detection and cleanup of canonical records that should have been one.
//!
//! Resolution policy, applied uniformly: the registry-sourced record wins; with
//! several registry records the most recently synced one is kept and the others
//! go to manual review; with none, the most recently synced record is kept.
//! A record holding a different subnet id than the kept one is a distinct
//! network to the resolver, so it is flagged for review instead of deleted.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use super::resolver::preference;
use crate::database::{ChainRecordStore, StoreError};
use crate::types::ChainRecord;

const NAME_NOISE: [&str; 6] = ["mainnet", "network", "chain", "subnet", "l1", "blockchain"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterReason {
    SharedIdentifier,
    SimilarName,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub reason: ClusterReason,
    pub members: Vec<ChainRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditResolution {
    pub reason: ClusterReason,
    pub members: Vec<String>,
    pub keep: String,
    pub delete: Vec<String>,
    pub manual_review: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub dry_run: bool,
    pub clusters: Vec<AuditResolution>,
    pub proposed_deletions: usize,
    pub manual_review: usize,
    pub deleted: u64,
}

/// Lowercased alphanumerics with filler words ("mainnet", "subnet", ...) removed.
pub fn normalize_name(name: &str) -> Option<String> {
    let normalized: String = name
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty() && !NAME_NOISE.contains(word))
        .collect();
    (!normalized.is_empty()).then_some(normalized)
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

fn union_by_key<F>(records: &[ChainRecord], set: &mut DisjointSet, key: F) -> Vec<(usize, usize)>
where
    F: Fn(&ChainRecord) -> Option<String>,
{
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut edges = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if let Some(k) = key(record) {
            match first_seen.get(&k) {
                Some(&j) => {
                    set.union(i, j);
                    edges.push((i, j));
                }
                None => {
                    first_seen.insert(k, i);
                }
            }
        }
    }
    edges
}

/// Links each provisional record to the record a legacy-id bridge would resolve it to.
/// Two subnet records sharing a numeric id are never linked.
fn union_legacy_bridges(records: &[ChainRecord], set: &mut DisjointSet) -> Vec<(usize, usize)> {
    let mut by_legacy: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        if let Some(id) = record.ids.legacy_numeric_id.as_deref() {
            by_legacy.entry(id).or_default().push(i);
        }
    }

    let mut edges = Vec::new();
    for members in by_legacy.values() {
        for &i in members {
            if records[i].primary_id.is_authoritative() {
                continue;
            }
            let target = members
                .iter()
                .copied()
                .filter(|&j| j != i)
                .min_by(|&a, &b| preference(&records[a], &records[b]));
            if let Some(j) = target {
                set.union(i, j);
                edges.push((i, j));
            }
        }
    }
    edges
}

/// Groups records that share a correlation identifier, then records with the same normalized name.
pub fn find_clusters(records: &[ChainRecord]) -> Vec<Cluster> {
    let mut records: Vec<ChainRecord> = records.to_vec();
    records.sort_by_key(|r| r.storage_key());

    let mut set = DisjointSet::new(records.len());
    let mut id_edges = Vec::new();
    id_edges.extend(union_legacy_bridges(&records, &mut set));
    id_edges.extend(union_by_key(&records, &mut set, |r| r.ids.ledger_id.clone()));
    id_edges.extend(union_by_key(&records, &mut set, |r| r.ids.platform_id.clone()));
    union_by_key(&records, &mut set, |r| normalize_name(&r.display_name()));

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..records.len() {
        let root = set.find(i);
        groups.entry(root).or_default().push(i);
    }
    let mut shared_id_roots = std::collections::HashSet::new();
    for (a, _) in id_edges {
        shared_id_roots.insert(set.find(a));
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(root, members)| Cluster {
            reason: if shared_id_roots.contains(&root) {
                ClusterReason::SharedIdentifier
            } else {
                ClusterReason::SimilarName
            },
            members: members.into_iter().map(|i| records[i].clone()).collect(),
        })
        .collect()
}

fn most_recent_first(a: &&ChainRecord, b: &&ChainRecord) -> Ordering {
    b.provenance
        .last_synced_at
        .cmp(&a.provenance.last_synced_at)
        .then_with(|| a.storage_key().cmp(&b.storage_key()))
}

/// Deterministic keep/delete decision for one cluster.
pub fn propose_resolution(cluster: &Cluster) -> AuditResolution {
    let mut ranked: Vec<&ChainRecord> = cluster.members.iter().collect();
    ranked.sort_by(most_recent_first);

    let registry: Vec<&ChainRecord> = ranked.iter().copied().filter(|r| r.is_registry_sourced()).collect();
    let keep = registry.first().copied().or_else(|| ranked.first().copied());
    let keep_key = keep.map(|r| r.storage_key()).unwrap_or_default();

    let keep_is_authoritative = keep.map_or(false, |r| r.primary_id.is_authoritative());
    let (manual_review, delete): (Vec<&ChainRecord>, Vec<&ChainRecord>) = ranked
        .iter()
        .copied()
        .filter(|r| r.storage_key() != keep_key)
        .partition(|r| r.is_registry_sourced() || (keep_is_authoritative && r.primary_id.is_authoritative()));
    let manual_review: Vec<String> = manual_review.iter().map(|r| r.storage_key()).collect();
    let delete: Vec<String> = delete.iter().map(|r| r.storage_key()).collect();

    let mut members: Vec<String> = cluster.members.iter().map(|r| r.storage_key()).collect();
    members.sort();

    AuditResolution {
        reason: cluster.reason,
        members,
        keep: keep_key,
        delete,
        manual_review,
    }
}

pub struct DuplicateAuditor {
    store: Arc<dyn ChainRecordStore>,
}

impl DuplicateAuditor {
    pub fn new(store: Arc<dyn ChainRecordStore>) -> Self {
        Self { store }
    }

    pub async fn find_duplicate_clusters(&self) -> Result<Vec<Cluster>, StoreError> {
        let records = self.store.list().await?;
        let clusters = find_clusters(&records);
        info!("Audit scanned {} records, found {} duplicate clusters", records.len(), clusters.len());
        Ok(clusters)
    }

    pub fn propose_resolution(&self, cluster: &Cluster) -> AuditResolution {
        propose_resolution(cluster)
    }

    /// Deletes the proposed records unless `dry_run`; manual-review records are never deleted.
    pub async fn apply(&self, resolutions: &[AuditResolution], dry_run: bool) -> Result<AuditReport, StoreError> {
        let doomed: Vec<String> = resolutions.iter().flat_map(|r| r.delete.iter().cloned()).collect();

        let mut report = AuditReport {
            dry_run,
            clusters: resolutions.to_vec(),
            proposed_deletions: doomed.len(),
            manual_review: resolutions.iter().map(|r| r.manual_review.len()).sum(),
            deleted: 0,
        };

        for resolution in resolutions {
            for key in &resolution.delete {
                if dry_run {
                    info!("[dry-run] would delete {} (keeping {})", key, resolution.keep);
                } else {
                    warn!("Deleting duplicate record {} (keeping {})", key, resolution.keep);
                }
            }
            for key in &resolution.manual_review {
                warn!("Record {} needs manual review against {}", key, resolution.keep);
            }
        }

        if !dry_run && !doomed.is_empty() {
            report.deleted = self.store.delete(&doomed).await?;
        }
        Ok(report)
    }

    pub async fn run(&self, dry_run: bool) -> Result<AuditReport, StoreError> {
        let clusters = self.find_duplicate_clusters().await?;
        let resolutions: Vec<AuditResolution> = clusters.iter().map(propose_resolution).collect();
        self.apply(&resolutions, dry_run).await
    }
}
