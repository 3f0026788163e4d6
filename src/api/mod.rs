//! Query Service - HTTP/JSON read API over the reading store
//!
//! | Route                           | Result                                   |
//! |---------------------------------|------------------------------------------|
//! | `GET /api/latest`               | latest reading per kind, `null` if none  |
//! | `GET /api/history/{kind}`       | ascending readings, `?hours=1&limit=100` |
//! | `GET /api/history`              | every kind at once, `?hours=1`, no cap   |
//! | `GET /api/stats/{kind}`         | `{count, avg, min, max}` or `{}`         |
//! | `GET /api/health`               | liveness plus ingestion counters         |
//!
//! Input is validated before the store is touched; a bad kind or parameter
//! is always a 400 with no storage call.

pub mod error;

pub use error::ApiError;

use crate::aggregator::{Aggregator, WindowStats};
use crate::clock::current_time;
use crate::listener::{IngestCounters, IngestSnapshot};
use crate::sensor::{Reading, ReadingView, SensorKind};
use crate::store::{ReadingStore, StoreError, TimeWindow};
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

const DEFAULT_HISTORY_HOURS: f64 = 1.0;
const DEFAULT_HISTORY_LIMIT: u32 = 100;
const DEFAULT_STATS_HOURS: f64 = 24.0;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ReadingStore>,
    pub aggregator: Aggregator,
    pub counters: Arc<IngestCounters>,
}

impl ApiState {
    pub fn new(store: Arc<dyn ReadingStore>, counters: Arc<IngestCounters>) -> Self {
        Self {
            aggregator: Aggregator::new(store.clone()),
            store,
            counters,
        }
    }
}

/// Create the query router, all routes nested under `/api`
pub fn create_router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/latest", get(latest_handler))
        .route("/history", get(history_all_handler))
        .route("/history/:kind", get(history_handler))
        .route("/stats/:kind", get(stats_handler))
        .route("/health", get(health_handler));

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub hours: Option<f64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct HoursParams {
    pub hours: Option<f64>,
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| ApiError::InvalidParameter(rejection.body_text()))
}

fn lookback_window(hours: Option<f64>, default: f64) -> Result<TimeWindow, ApiError> {
    let hours = hours.unwrap_or(default);
    if !hours.is_finite() || hours < 0.0 {
        return Err(ApiError::InvalidParameter(format!(
            "hours must be a non-negative number, got {}",
            hours
        )));
    }
    Ok(TimeWindow::lookback(hours, current_time()))
}

/// Run one store query per kind concurrently; results come back in `SensorKind::ALL` order
async fn per_kind<T, F, Fut>(query: F) -> Vec<(SensorKind, Result<T, StoreError>)>
where
    F: Fn(SensorKind) -> Fut,
    Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = SensorKind::ALL
        .into_iter()
        .map(|kind| (kind, tokio::spawn(query(kind))))
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (kind, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(StoreError::from(e)),
        };
        results.push((kind, result));
    }
    results
}

/// GET /api/latest
async fn latest_handler(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let store = state.store.clone();
    let results = per_kind(move |kind| {
        let store = store.clone();
        async move { store.most_recent(kind).await }
    })
    .await;

    let mut latest: Vec<(SensorKind, Option<Reading>)> = Vec::with_capacity(results.len());
    for (kind, result) in results {
        latest.push((kind, result?));
    }

    let body: BTreeMap<&'static str, Option<ReadingView<'_>>> = latest
        .iter()
        .map(|(kind, reading)| (kind.as_str(), reading.as_ref().map(ReadingView::from)))
        .collect();
    Ok(Json(body).into_response())
}

/// GET /api/history/{kind}?hours=1&limit=100
async fn history_handler(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    query: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let kind: SensorKind = kind.parse()?;
    let params = query_params(query)?;
    let window = lookback_window(params.hours, DEFAULT_HISTORY_HOURS)?;
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let readings = state.store.range(kind, window, Some(limit)).await?;
    let body: Vec<ReadingView<'_>> = readings.iter().map(ReadingView::from).collect();
    Ok(Json(body).into_response())
}

/// One kind's slot in the history-all response
#[derive(Serialize)]
#[serde(untagged)]
enum KindHistory<'a> {
    Readings(Vec<ReadingView<'a>>),
    Failed { error: String },
}

/// GET /api/history?hours=1
///
/// Each kind succeeds or fails on its own; the response is 200 either way.
async fn history_all_handler(
    State(state): State<ApiState>,
    query: Result<Query<HoursParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let params = query_params(query)?;
    let window = lookback_window(params.hours, DEFAULT_HISTORY_HOURS)?;

    let store = state.store.clone();
    let results = per_kind(move |kind| {
        let store = store.clone();
        async move { store.range(kind, window, None).await }
    })
    .await;

    let body: BTreeMap<&'static str, KindHistory<'_>> = results
        .iter()
        .map(|(kind, result)| {
            let slot = match result {
                Ok(readings) => KindHistory::Readings(readings.iter().map(ReadingView::from).collect()),
                Err(e) => {
                    log::error!("❌ History query for {} failed: {}", kind, e);
                    KindHistory::Failed {
                        error: format!("Failed to load {} history", kind),
                    }
                }
            };
            (kind.as_str(), slot)
        })
        .collect();
    Ok(Json(body).into_response())
}

/// Stats response; an empty window serializes as `{}`
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatsBody {
    Summary { count: u64, avg: f64, min: f64, max: f64 },
    Empty {},
}

impl From<WindowStats> for StatsBody {
    fn from(stats: WindowStats) -> Self {
        match (stats.average, stats.min, stats.max) {
            (Some(avg), Some(min), Some(max)) if stats.count > 0 => StatsBody::Summary {
                count: stats.count,
                avg,
                min,
                max,
            },
            _ => StatsBody::Empty {},
        }
    }
}

/// GET /api/stats/{kind}?hours=24
async fn stats_handler(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    query: Result<Query<HoursParams>, QueryRejection>,
) -> Result<Json<StatsBody>, ApiError> {
    let kind: SensorKind = kind.parse()?;
    let params = query_params(query)?;
    let window = lookback_window(params.hours, DEFAULT_STATS_HOURS)?;

    let stats = state.aggregator.stats(kind, window).await?;
    Ok(Json(StatsBody::from(stats)))
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub ingest: IngestSnapshot,
}

/// GET /api/health
async fn health_handler(State(state): State<ApiState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        timestamp: current_time(),
        ingest: state.counters.snapshot(),
    })
}
