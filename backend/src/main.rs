use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use chainstats_backend::api::{create_chains_router, ChainsApiState};
use chainstats_backend::config::AppConfig;
use chainstats_backend::database::{
    self, ChainRecordStore, InMemoryChainStore, InMemorySampleStore, MetricSampleStore, MetricSeriesWriter,
    MigrationRunner, PgChainRepository, PgSampleRepository,
};
use chainstats_backend::metrics_api::{MetricsApiClient, MetricsSource};
use chainstats_backend::registry::RegistryLoader;
use chainstats_backend::scheduler::RateLimitedScheduler;
use chainstats_backend::sync::{BackgroundJobManager, ChainListSync, Job, MetricFetcher, RegistrySync};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env()?;

    let store: Arc<dyn ChainRecordStore>;
    let samples: Arc<dyn MetricSampleStore>;
    match &config.database.url {
        Some(url) => {
            let pool = database::connect(&config.database, url).await?;
            MigrationRunner::new(pool.clone()).run_migrations().await?;
            store = Arc::new(PgChainRepository::new(pool.clone()));
            samples = Arc::new(PgSampleRepository::new(pool));
            info!("✅ Postgres stores initialized");
        }
        None => {
            warn!("No database URL configured, using in-memory stores");
            store = Arc::new(InMemoryChainStore::new());
            samples = Arc::new(InMemorySampleStore::new());
        }
    }

    // one budget per upstream host
    let scheduler = Arc::new(RateLimitedScheduler::new("metrics_api", config.scheduler.clone()));
    let source: Arc<dyn MetricsSource> = Arc::new(MetricsApiClient::new(&config.metrics_api));

    let series = MetricSeriesWriter::new(Arc::clone(&samples));

    let registry_sync = Arc::new(
        RegistrySync::new(
            RegistryLoader::new(config.registry.directory.clone(), config.registry.descriptor_file.clone()),
            Arc::clone(&store),
        )
        .with_series_writer(series.clone()),
    );
    let chain_list_sync = Arc::new(
        ChainListSync::new(Arc::clone(&source), Arc::clone(&scheduler), Arc::clone(&store))
            .with_series_writer(series.clone()),
    );
    let metric_fetcher = Arc::new(MetricFetcher::new(
        Arc::clone(&source),
        Arc::clone(&scheduler),
        Arc::clone(&store),
        series,
        config.metrics_api.lookback_days,
    ));

    let jobs = BackgroundJobManager::new(registry_sync, chain_list_sync, metric_fetcher, config.jobs.clone());
    if let Err(e) = jobs.trigger(Job::RegistrySync).await {
        warn!("Initial registry sync failed: {}", e);
    }
    jobs.start().await?;
    info!("✅ Background jobs scheduled");

    let app = create_chains_router()
        .with_state(ChainsApiState::new(store, samples))
        .layer(CorsLayer::permissive());

    info!("🔧 Routes configured:");
    info!("  - /health");
    info!("  - /api/chains, /api/chains/:primary_id");
    info!("  - /api/chains/:primary_id/metrics/:metric");

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!("🚀 Server bound to {}, starting HTTP service...", config.server.bind_addr);
    axum::serve(listener, app).await?;

    jobs.stop().await;
    Ok(())
}
