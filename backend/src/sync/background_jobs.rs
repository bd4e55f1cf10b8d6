use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{ChainListSync, MetricFetcher, RegistrySync, SyncError};
use crate::config::JobsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    RegistrySync,
    ChainListSync,
    MetricFetch,
}

impl Job {
    pub const ALL: [Job; 3] = [Job::RegistrySync, Job::ChainListSync, Job::MetricFetch];

    pub fn name(&self) -> &'static str {
        match self {
            Job::RegistrySync => "registry_sync",
            Job::ChainListSync => "chain_list_sync",
            Job::MetricFetch => "metric_fetch",
        }
    }

    fn cron_expression<'a>(&self, config: &'a JobsConfig) -> &'a str {
        match self {
            Job::RegistrySync => config.registry_sync_cron.as_str(),
            Job::ChainListSync => config.chain_list_sync_cron.as_str(),
            Job::MetricFetch => config.metrics_fetch_cron.as_str(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatus {
    pub is_running: bool,
    pub last_registry_sync: Option<DateTime<Utc>>,
    pub last_chain_list_sync: Option<DateTime<Utc>>,
    pub last_metric_fetch: Option<DateTime<Utc>>,
}

/// Runs the sync passes on their cron schedules.
#[derive(Clone)]
pub struct BackgroundJobManager {
    registry_sync: Arc<RegistrySync>,
    chain_list_sync: Arc<ChainListSync>,
    metric_fetcher: Arc<MetricFetcher>,
    config: JobsConfig,
    is_running: Arc<RwLock<bool>>,
    status: Arc<RwLock<JobStatus>>,
}

impl BackgroundJobManager {
    pub fn new(
        registry_sync: Arc<RegistrySync>,
        chain_list_sync: Arc<ChainListSync>,
        metric_fetcher: Arc<MetricFetcher>,
        config: JobsConfig,
    ) -> Self {
        Self {
            registry_sync,
            chain_list_sync,
            metric_fetcher,
            config,
            is_running: Arc::new(RwLock::new(false)),
            status: Arc::new(RwLock::new(JobStatus::default())),
        }
    }

    pub fn parse_schedule(job: Job, config: &JobsConfig) -> Result<Schedule, SyncError> {
        Schedule::from_str(job.cron_expression(config)).map_err(|e| SyncError::InvalidSchedule {
            job: job.name().to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn start(&self) -> Result<(), SyncError> {
        let schedules = Job::ALL
            .iter()
            .map(|&job| Self::parse_schedule(job, &self.config).map(|s| (job, s)))
            .collect::<Result<Vec<_>, _>>()?;

        {
            let mut running = self.is_running.write().await;
            if *running {
                warn!("Background job manager is already running");
                return Ok(());
            }
            *running = true;
        }
        self.status.write().await.is_running = true;

        info!("Starting background job manager");
        for (job, schedule) in schedules {
            tokio::spawn({
                let manager = self.clone();
                async move { manager.cron_loop(job, schedule).await }
            });
        }
        Ok(())
    }

    pub async fn stop(&self) {
        *self.is_running.write().await = false;
        self.status.write().await.is_running = false;
        info!("Stopped background job manager");
    }

    async fn cron_loop(&self, job: Job, schedule: Schedule) {
        loop {
            if !*self.is_running.read().await {
                info!("{} job stopped", job.name());
                break;
            }

            let now = Utc::now();
            let Some(next_run) = schedule.upcoming(Utc).next() else {
                error!("No upcoming schedule for {} job", job.name());
                break;
            };
            let wait = (next_run - now).to_std().unwrap_or(Duration::from_secs(60));
            info!("Next {} scheduled for: {}", job.name(), next_run);
            sleep(wait).await;

            if !*self.is_running.read().await {
                info!("{} job stopped", job.name());
                break;
            }
            if let Err(e) = self.trigger(job).await {
                error!("{} job failed: {}", job.name(), e);
            }
        }
    }

    /// Runs one pass immediately, outside the schedule.
    pub async fn trigger(&self, job: Job) -> Result<(), SyncError> {
        let run_id = Uuid::new_v4();
        info!("Starting {} job {}", job.name(), run_id);
        match job {
            Job::RegistrySync => {
                self.registry_sync.run().await?;
            }
            Job::ChainListSync => {
                self.chain_list_sync.run().await?;
            }
            Job::MetricFetch => {
                self.metric_fetcher.run().await?;
            }
        }

        info!("Finished {} job {}", job.name(), run_id);
        let finished = Some(Utc::now());
        let mut status = self.status.write().await;
        match job {
            Job::RegistrySync => status.last_registry_sync = finished,
            Job::ChainListSync => status.last_chain_list_sync = finished,
            Job::MetricFetch => status.last_metric_fetch = finished,
        }
        Ok(())
    }

    pub async fn get_job_status(&self) -> JobStatus {
        self.status.read().await.clone()
    }
}
