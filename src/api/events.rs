//! Unauthenticated user-event ingest.

use super::{ApiResult, AppState};
use crate::error::CoreError;
use crate::models::{UserEvent, UserEventType};
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct UserEventPayload {
    pub user_anon_id: String,
    pub session_id: String,
    pub event_type: String,
    pub player_id: Option<Uuid>,
    pub club_id: Option<Uuid>,
    /// Defaults to the server clock when omitted.
    pub occurred_at: Option<DateTime<Utc>>,
    pub device_type: Option<String>,
    pub country_code: Option<String>,
    pub props: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct UserEventResponse {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

pub async fn create_user_event(
    State(state): State<AppState>,
    Json(payload): Json<UserEventPayload>,
) -> ApiResult<(StatusCode, Json<UserEventResponse>)> {
    let event_type: UserEventType = payload
        .event_type
        .parse()
        .map_err(CoreError::Validation)?;

    if payload.user_anon_id.trim().is_empty() || payload.session_id.trim().is_empty() {
        return Err(CoreError::Validation("user_anon_id and session_id are required".into()).into());
    }

    let event = UserEvent {
        id: Uuid::new_v4(),
        user_anon_id: payload.user_anon_id,
        session_id: payload.session_id,
        event_type,
        player_id: payload.player_id,
        club_id: payload.club_id,
        occurred_at: payload.occurred_at.unwrap_or_else(Utc::now),
        device_type: payload.device_type,
        country_code: payload.country_code,
        props: payload.props,
    };
    state.store.insert_user_event(&event)?;

    Ok((
        StatusCode::CREATED,
        Json(UserEventResponse {
            id: event.id,
            occurred_at: event.occurred_at,
        }),
    ))
}
