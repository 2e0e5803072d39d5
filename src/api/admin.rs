//! API-key-guarded admin writes: ledger appends, signal appends, and the
//! projection rebuild.

use super::{ApiResult, AppState};
use crate::error::CoreError;
use crate::models::{
    transfer_event_id, EntityType, FeeType, NewSignalEvent, SignalValue, TransferEvent,
    TransferType,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every admin handler starts here. Unconfigured key disables the surface.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), CoreError> {
    let Some(ref expected) = state.config.admin_api_key else {
        return Err(CoreError::Forbidden);
    };
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(CoreError::Unauthorized)?;
    if presented != expected {
        return Err(CoreError::Forbidden);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct TransferEventPayload {
    pub player_id: Uuid,
    pub from_club_id: Option<Uuid>,
    pub to_club_id: Uuid,
    pub transfer_type: String,
    pub transfer_date: NaiveDate,
    pub fee_amount: Option<f64>,
    pub fee_currency: Option<String>,
    pub fee_amount_eur: Option<f64>,
    pub fee_type: Option<String>,
    pub contract_start: Option<NaiveDate>,
    pub contract_end: Option<NaiveDate>,
    pub loan_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub option_to_buy: bool,
    pub option_fee_eur: Option<f64>,
    #[serde(default)]
    pub obligation_to_buy: bool,
    pub obligation_fee_eur: Option<f64>,
    pub sell_on_percent: Option<f64>,
    #[serde(default)]
    pub buy_back_clause: bool,
    pub buy_back_fee_eur: Option<f64>,
    pub source: Option<String>,
    pub source_confidence: Option<f64>,
    /// When set, the new row supersedes this existing event.
    pub supersedes_event_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransferEventResponse {
    pub event_id: String,
    pub superseded: Option<String>,
}

pub async fn create_transfer_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<TransferEventPayload>,
) -> ApiResult<(StatusCode, Json<TransferEventResponse>)> {
    require_admin(&state, &headers)?;

    state.store.require_player(payload.player_id)?;
    state.store.require_club(payload.to_club_id)?;
    if let Some(from) = payload.from_club_id {
        state.store.require_club(from)?;
    }

    let transfer_type: TransferType = payload
        .transfer_type
        .parse()
        .map_err(CoreError::Validation)?;
    let fee_type: FeeType = payload
        .fee_type
        .as_deref()
        .unwrap_or("undisclosed")
        .parse()
        .map_err(CoreError::Validation)?;

    let mut event_id =
        transfer_event_id(payload.transfer_date, payload.player_id, payload.from_club_id);
    // A correction gets a derived id so it can never collide with the row it
    // replaces.
    if payload.supersedes_event_id.is_some() {
        event_id = format!("{event_id}-r{}", Utc::now().format("%H%M%S%6f"));
    }

    let event = TransferEvent {
        id: Uuid::new_v4(),
        event_id: event_id.clone(),
        player_id: payload.player_id,
        from_club_id: payload.from_club_id,
        to_club_id: payload.to_club_id,
        transfer_type,
        transfer_date: payload.transfer_date,
        fee_amount: payload.fee_amount,
        fee_currency: payload.fee_currency,
        fee_amount_eur: payload.fee_amount_eur,
        fee_type,
        contract_start: payload.contract_start,
        contract_end: payload.contract_end,
        loan_end_date: payload.loan_end_date,
        option_to_buy: payload.option_to_buy,
        option_fee_eur: payload.option_fee_eur,
        obligation_to_buy: payload.obligation_to_buy,
        obligation_fee_eur: payload.obligation_fee_eur,
        sell_on_percent: payload.sell_on_percent,
        buy_back_clause: payload.buy_back_clause,
        buy_back_fee_eur: payload.buy_back_fee_eur,
        source: payload.source.unwrap_or_else(|| "admin".to_string()),
        source_confidence: payload.source_confidence.unwrap_or(1.0),
        created_at: Utc::now(),
        is_superseded: false,
        superseded_by: None,
    };

    let superseded = match payload.supersedes_event_id {
        Some(old_event_id) => {
            state.store.supersede_transfer(&old_event_id, &event)?;
            Some(old_event_id)
        }
        None => {
            state.store.insert_transfer(&event)?;
            None
        }
    };

    // Keep the player hint columns roughly current on admin writes only.
    if transfer_type != TransferType::Retirement {
        let mut player = state.store.require_player(payload.player_id)?;
        player.current_club_id = Some(payload.to_club_id);
        player.contract_until = payload.contract_end;
        state.store.upsert_player(&player)?;
    }

    Ok((
        StatusCode::CREATED,
        Json(TransferEventResponse {
            event_id,
            superseded,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SignalEventPayload {
    pub entity_type: String,
    pub player_id: Option<Uuid>,
    pub club_id: Option<Uuid>,
    pub signal_type: String,
    pub value_num: Option<f64>,
    pub value_text: Option<String>,
    pub value_json: Option<serde_json::Value>,
    pub source: String,
    pub source_id: Option<String>,
    pub confidence: Option<f64>,
    pub observed_at: DateTime<Utc>,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SignalEventResponse {
    pub id: Uuid,
}

pub async fn create_signal_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SignalEventPayload>,
) -> ApiResult<(StatusCode, Json<SignalEventResponse>)> {
    require_admin(&state, &headers)?;

    let entity_type: EntityType = payload
        .entity_type
        .parse()
        .map_err(CoreError::Validation)?;
    let signal_type = payload
        .signal_type
        .parse()
        .map_err(CoreError::Validation)?;

    let value = match (payload.value_num, payload.value_text, payload.value_json) {
        (Some(v), None, None) => SignalValue::Num(v),
        (None, Some(s), None) => SignalValue::Text(s),
        (None, None, Some(j)) => SignalValue::Json(j),
        _ => {
            return Err(CoreError::Validation(
                "exactly one of value_num, value_text, value_json must be set".into(),
            )
            .into())
        }
    };

    let event = state.store.insert_signal(&NewSignalEvent {
        entity_type,
        player_id: payload.player_id,
        club_id: payload.club_id,
        signal_type,
        value,
        source: payload.source,
        source_id: payload.source_id,
        confidence: payload.confidence.unwrap_or(1.0),
        observed_at: payload.observed_at,
        effective_from: payload.effective_from,
        effective_to: payload.effective_to,
    })?;

    Ok((StatusCode::CREATED, Json(SignalEventResponse { id: event.id })))
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub rows: usize,
}

pub async fn rebuild_materialized(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<RebuildResponse>> {
    require_admin(&state, &headers)?;
    let rows = state.store.refresh_market_view()?;
    Ok(Json(RebuildResponse { rows }))
}
