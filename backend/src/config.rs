use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub metrics_api: MetricsApiConfig,
    pub scheduler: SchedulerConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// In-memory stores are used when unset.
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub directory: PathBuf,
    pub descriptor_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub request_timeout: Duration,
    pub lookback_days: i64,
}

/// Budget and retry policy of one upstream host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_per_minute: u32,
    /// Fixed gap enforced between two dispatches.
    pub min_spacing: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// Cron expressions (with seconds field) for the periodic passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub registry_sync_cron: String,
    pub chain_list_sync_cron: String,
    pub metrics_fetch_cron: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./registry"),
            descriptor_file: "chain.json".to_string(),
        }
    }
}

impl Default for MetricsApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://metrics.avax.network/v2".to_string(),
            api_key: None,
            api_key_header: "x-glacier-api-key".to_string(),
            request_timeout: Duration::from_secs(15),
            lookback_days: 30,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 60,
            min_spacing: Duration::from_millis(100),
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            registry_sync_cron: "0 0 */6 * * *".to_string(),
            chain_list_sync_cron: "0 */30 * * * *".to_string(),
            metrics_fetch_cron: "0 15 * * * *".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by `CHAINSTATS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(v) = lookup("CHAINSTATS_BIND_ADDR") {
            config.server.bind_addr = v;
        }
        if let Some(v) = lookup("CHAINSTATS_DATABASE_URL") {
            config.database.url = Some(v).filter(|s| !s.is_empty());
        }
        parse_into(&lookup, "CHAINSTATS_DATABASE_MAX_CONNECTIONS", &mut config.database.max_connections)?;
        if let Some(v) = lookup("CHAINSTATS_REGISTRY_DIR") {
            config.registry.directory = PathBuf::from(v);
        }
        if let Some(v) = lookup("CHAINSTATS_REGISTRY_FILE") {
            config.registry.descriptor_file = v;
        }
        if let Some(v) = lookup("CHAINSTATS_METRICS_API_URL") {
            config.metrics_api.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("CHAINSTATS_METRICS_API_KEY") {
            config.metrics_api.api_key = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("CHAINSTATS_METRICS_API_KEY_HEADER") {
            config.metrics_api.api_key_header = v;
        }
        parse_into(&lookup, "CHAINSTATS_LOOKBACK_DAYS", &mut config.metrics_api.lookback_days)?;
        parse_millis(&lookup, "CHAINSTATS_REQUEST_TIMEOUT_MS", &mut config.metrics_api.request_timeout)?;

        parse_into(&lookup, "CHAINSTATS_MAX_REQUESTS_PER_MINUTE", &mut config.scheduler.max_per_minute)?;
        parse_into(&lookup, "CHAINSTATS_MAX_ATTEMPTS", &mut config.scheduler.max_attempts)?;
        parse_millis(&lookup, "CHAINSTATS_MIN_SPACING_MS", &mut config.scheduler.min_spacing)?;
        parse_millis(&lookup, "CHAINSTATS_RETRY_BASE_MS", &mut config.scheduler.base_delay)?;
        parse_millis(&lookup, "CHAINSTATS_RETRY_MAX_MS", &mut config.scheduler.max_delay)?;
        if config.scheduler.max_per_minute == 0 {
            return Err(ConfigError::Invalid {
                key: "CHAINSTATS_MAX_REQUESTS_PER_MINUTE".to_string(),
                value: "0".to_string(),
            });
        }

        if let Some(v) = lookup("CHAINSTATS_REGISTRY_SYNC_CRON") {
            config.jobs.registry_sync_cron = v;
        }
        if let Some(v) = lookup("CHAINSTATS_CHAIN_LIST_SYNC_CRON") {
            config.jobs.chain_list_sync_cron = v;
        }
        if let Some(v) = lookup("CHAINSTATS_METRICS_FETCH_CRON") {
            config.jobs.metrics_fetch_cron = v;
        }

        Ok(config)
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn parse_millis<F>(lookup: &F, key: &str, target: &mut Duration) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut millis = target.as_millis() as u64;
    parse_into(lookup, key, &mut millis)?;
    *target = Duration::from_millis(millis);
    Ok(())
}
