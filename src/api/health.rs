//! Health, readiness, and liveness probes.

use super::{ApiResult, AppState};
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub tables: Vec<TableCount>,
}

#[derive(Debug, Serialize)]
pub struct TableCount {
    pub table: String,
    pub rows: i64,
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let tables = state
        .store
        .table_counts()?
        .into_iter()
        .map(|(table, rows)| TableCount { table, rows })
        .collect();
    Ok(Json(HealthResponse {
        status: "ok",
        tables,
    }))
}

pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.store.ping() {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ready": true}))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ready": false, "error": e.to_string()})),
        ),
    }
}

pub async fn live() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
