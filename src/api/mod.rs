//! Read-mostly HTTP surface over the core.
//!
//! Thin handlers: parse, call the store/jobs, map errors to a stable
//! `{error, message, details?}` shape. All heavy lifting lives below the
//! store boundary.

pub mod admin;
pub mod clubs;
pub mod events;
pub mod health;
pub mod market;
pub mod players;
pub mod search;

use crate::config::Config;
use crate::error::CoreError;
use crate::store::Store;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<Config>,
}

/// Error envelope for every non-2xx response.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            CoreError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            CoreError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            CoreError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            CoreError::DataLeakage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "data_leakage"),
            CoreError::TimeTravelViolation(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "time_travel_violation")
            }
            CoreError::InsufficientData(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "insufficient_data")
            }
            CoreError::ArtifactLoadFailure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "artifact_load_failure")
            }
            CoreError::Store(_) | CoreError::Serde(_) | CoreError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }

        let body = serde_json::json!({
            "error": kind,
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Parse an optional `as_of` query value (RFC 3339).
pub(crate) fn parse_as_of(value: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| {
                ApiError(CoreError::Validation(format!(
                    "invalid as_of timestamp {raw:?}: {e}"
                )))
            }),
    }
}

/// Assemble the application router (middleware layered in `main`).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/search", get(search::search))
        .route("/players/:id", get(players::get_player))
        .route("/players/:id/signals", get(players::get_player_signals))
        .route(
            "/players/:id/predictions",
            get(players::get_player_predictions),
        )
        .route("/clubs/:id", get(clubs::get_club))
        .route("/market/latest", get(market::get_market_latest))
        .route("/events/user", post(events::create_user_event))
        .route("/admin/transfer_events", post(admin::create_transfer_event))
        .route("/admin/signal_events", post(admin::create_signal_event))
        .route(
            "/admin/rebuild/materialized",
            post(admin::rebuild_materialized),
        )
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/live", get(health::live))
        .with_state(state)
}
