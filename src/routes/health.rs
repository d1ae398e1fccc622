use std::time::SystemTime;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    store_backend: &'static str,
    cache_backend: &'static str,
    start_time: String,
    uptime: u64,
    timestamp: String,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        store_backend: state.store_backend(),
        cache_backend: state.cache().backend_name(),
        start_time: system_time_iso(state.started_at_system()),
        uptime: state.uptime_seconds(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

fn system_time_iso(at: SystemTime) -> String {
    DateTime::<Utc>::from(at).to_rfc3339()
}
