use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::database::{ChainRecordStore, MetricSampleStore};
use crate::types::{ChainRecord, MetricKind, MetricSample};

#[derive(Clone)]
pub struct ChainsApiState {
    pub store: Arc<dyn ChainRecordStore>,
    pub samples: Arc<dyn MetricSampleStore>,
}

impl ChainsApiState {
    pub fn new(store: Arc<dyn ChainRecordStore>, samples: Arc<dyn MetricSampleStore>) -> Self {
        Self { store, samples }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub chains: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChainListResponse {
    pub success: bool,
    pub chains: Vec<ChainRecord>,
    pub total_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricSeriesResponse {
    pub success: bool,
    pub chain: String,
    pub metric: MetricKind,
    pub samples: Vec<MetricSample>,
    pub total_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

pub fn create_chains_router() -> Router<ChainsApiState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/chains", get(list_chains))
        .route("/api/chains/:primary_id", get(get_chain))
        .route("/api/chains/:primary_id/metrics/:metric", get(get_metric_series))
}

async fn health(State(state): State<ChainsApiState>) -> Result<Json<HealthResponse>, StatusCode> {
    let chains = state.store.list().await.map_err(internal)?.len();
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        chains,
    }))
}

async fn list_chains(State(state): State<ChainsApiState>) -> Result<Json<ChainListResponse>, StatusCode> {
    let mut chains = state.store.list().await.map_err(internal)?;
    chains.sort_by(|a, b| {
        a.display_name()
            .to_lowercase()
            .cmp(&b.display_name().to_lowercase())
            .then_with(|| a.storage_key().cmp(&b.storage_key()))
    });

    Ok(Json(ChainListResponse {
        success: true,
        total_count: chains.len(),
        chains,
    }))
}

async fn get_chain(
    State(state): State<ChainsApiState>,
    Path(primary_id): Path<String>,
) -> Result<Json<ChainRecord>, StatusCode> {
    state
        .store
        .get(&primary_id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_metric_series(
    State(state): State<ChainsApiState>,
    Path((primary_id, metric)): Path<(String, String)>,
    Query(range): Query<RangeParams>,
) -> Result<Json<MetricSeriesResponse>, StatusCode> {
    let metric: MetricKind = metric.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    if state.store.get(&primary_id).await.map_err(internal)?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    let samples = state
        .samples
        .range(metric, &primary_id, range.from, range.to)
        .await
        .map_err(internal)?;

    Ok(Json(MetricSeriesResponse {
        success: true,
        chain: primary_id,
        metric,
        total_count: samples.len(),
        samples,
    }))
}

fn internal(e: impl std::fmt::Display) -> StatusCode {
    error!("Chain API storage error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
