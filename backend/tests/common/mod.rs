#![allow(dead_code)]

use async_trait::async_trait;
use chainstats_backend::config::SchedulerConfig;
use chainstats_backend::metrics_api::{
    ApiChain, ApiValidator, ChainListPage, FetchError, MetricPage, MetricsSource, RawSample, TimeWindow,
};
use chainstats_backend::scheduler::RateLimitedScheduler;
use chainstats_backend::types::{
    ChainDescriptor, ChainRecord, Descriptive, LiveData, MetricKind, PrimaryId, Provenance, SecondaryIds, SourceTag,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Canned metrics API: chain listing pages and per (chain, metric) series.
#[derive(Default)]
pub struct FakeMetricsSource {
    pub pages: Vec<Vec<ApiChain>>,
    pub series: HashMap<(String, MetricKind), Vec<RawSample>>,
    pub failing_metric: Option<MetricKind>,
    pub calls: AtomicUsize,
}

impl FakeMetricsSource {
    pub fn with_chains(chains: Vec<ApiChain>) -> Self {
        Self {
            pages: vec![chains],
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for FakeMetricsSource {
    async fn list_chains_page(&self, page_token: Option<String>) -> Result<ChainListPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        Ok(ChainListPage {
            chains: self.pages.get(index).cloned().unwrap_or_default(),
            next_page_token: (index + 1 < self.pages.len()).then(|| (index + 1).to_string()),
        })
    }

    async fn metric_page(
        &self,
        chain_id: &str,
        metric: MetricKind,
        _window: TimeWindow,
        _page_token: Option<String>,
    ) -> Result<MetricPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_metric == Some(metric) {
            return Err(FetchError::Status {
                status: 404,
                body: "metric not tracked".to_string(),
            });
        }
        Ok(MetricPage {
            results: self.series.get(&(chain_id.to_string(), metric)).cloned().unwrap_or_default(),
            next_page_token: None,
        })
    }

    fn source_name(&self) -> &str {
        "fake"
    }
}

pub fn fast_scheduler() -> Arc<RateLimitedScheduler> {
    Arc::new(RateLimitedScheduler::new(
        "test",
        SchedulerConfig {
            max_per_minute: 10_000,
            min_spacing: std::time::Duration::ZERO,
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
        },
    ))
}

pub fn api_chain(chain_id: &str, name: &str, subnet_id: Option<&str>, validators: &[&str]) -> ApiChain {
    ApiChain {
        chain_id: chain_id.to_string(),
        chain_name: Some(name.to_string()),
        subnet_id: subnet_id.map(str::to_string),
        blockchain_id: None,
        platform_chain_id: None,
        validators: Some(
            validators
                .iter()
                .map(|v| ApiValidator {
                    node_id: v.to_string(),
                    weight: Some(100),
                })
                .collect(),
        ),
    }
}

pub fn registry_descriptor(subnet: &str, legacy: Option<&str>, name: &str) -> ChainDescriptor {
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
            description: Some(format!("{} network", name)),
            categories: vec!["defi".to_string()],
            ..Default::default()
        }),
        live: None,
        origin_folder: Some(name.to_lowercase()),
    }
}

pub fn metrics_descriptor(legacy: &str, name: &str, validators: &[&str]) -> ChainDescriptor {
    api_chain(legacy, name, None, validators).into_descriptor()
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

/// A stored record built directly, bypassing reconciliation.
pub fn stored_record(
    primary_id: PrimaryId,
    legacy: Option<&str>,
    name: Option<&str>,
    source: SourceTag,
    synced_days_ago: i64,
) -> ChainRecord {
    let mut live = LiveData::default();
    let descriptive = match source {
        SourceTag::Registry => name.map(|n| Descriptive {
            name: n.to_string(),
            ..Default::default()
        }),
        SourceTag::MetricsApi => {
            live.api_name = name.map(str::to_string);
            None
        }
    };
    ChainRecord {
        primary_id,
        ids: SecondaryIds {
            legacy_numeric_id: legacy.map(str::to_string),
            ledger_id: None,
            platform_id: None,
        },
        descriptive,
        live,
        provenance: Provenance {
            source_tag: source,
            last_synced_at: base_time() - Duration::days(synced_days_ago),
            origin_folder: None,
        },
    }
}

pub fn write_registry_file(root: &Path, folder: &str, contents: &str) {
    let dir = root.join(folder);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("chain.json"), contents).unwrap();
}

pub fn registry_json(subnet: &str, name: &str, evm_chain_id: u64) -> String {
    format!(
        r#"{{
            "subnetId": "{subnet}",
            "name": "{name}",
            "description": "{name} network",
            "website": "https://{evm_chain_id}.example",
            "categories": ["defi"],
            "chains": [
                {{ "chainName": "{name} C", "evmChainId": {evm_chain_id}, "rpcUrls": ["https://rpc.{evm_chain_id}.example"] }}
            ]
        }}"#
    )
}
