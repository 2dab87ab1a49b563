// src/api.rs
// Thin HTTP surface over the pipeline and the reporting reads. The dashboard
// and CLI trigger consume these; all heavy lifting stays in the library.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::classify::EventCategory;
use crate::pipeline::{Pipeline, RunSummary};
use crate::store::{EventFilter, EventRecord, EventStats, Store, StoredCompetitor};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<Store>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/run", post(run_full))
        .route("/run/fetch", post(run_fetch))
        .route("/run/classify", post(run_classify))
        .route("/competitors", get(competitors))
        .route("/events", get(events))
        .route("/stats", get(stats))
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn run_full(State(state): State<AppState>) -> Result<Json<RunSummary>, ApiError> {
    let summary = state
        .pipeline
        .run(&CancellationToken::new())
        .await
        .map_err(internal)?;
    Ok(Json(summary))
}

async fn run_fetch(State(state): State<AppState>) -> Result<Json<RunSummary>, ApiError> {
    let summary = state
        .pipeline
        .run_fetch_only(&CancellationToken::new())
        .await
        .map_err(internal)?;
    Ok(Json(summary))
}

async fn run_classify(State(state): State<AppState>) -> Result<Json<RunSummary>, ApiError> {
    let summary = state
        .pipeline
        .run_classify_only(&CancellationToken::new())
        .await
        .map_err(internal)?;
    Ok(Json(summary))
}

async fn competitors(
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredCompetitor>>, ApiError> {
    Ok(Json(state.store.list_competitors().map_err(internal)?))
}

#[derive(serde::Deserialize)]
struct EventsQuery {
    competitor: Option<String>,
    category: Option<String>,
    from: Option<String>,
    to: Option<String>,
    limit: Option<usize>,
}

async fn events(
    State(state): State<AppState>,
    Query(q): Query<EventsQuery>,
) -> Result<Json<Vec<EventRecord>>, ApiError> {
    let category = match q.category.as_deref() {
        Some(raw) => Some(EventCategory::parse(raw).ok_or((
            StatusCode::BAD_REQUEST,
            format!("unknown category: {raw}"),
        ))?),
        None => None,
    };

    let filter = EventFilter {
        competitor: q.competitor,
        category,
        from: parse_ts(q.from.as_deref(), "from")?,
        to: parse_ts(q.to.as_deref(), "to")?,
        limit: q.limit,
    };
    Ok(Json(state.store.query_events(&filter).map_err(internal)?))
}

async fn stats(State(state): State<AppState>) -> Result<Json<EventStats>, ApiError> {
    Ok(Json(state.store.event_stats().map_err(internal)?))
}

fn parse_ts(raw: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("{field} must be RFC 3339, got {s:?}"),
                )
            }),
    }
}
