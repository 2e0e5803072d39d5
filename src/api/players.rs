//! Player read endpoints.

use super::{parse_as_of, ApiResult, AppState};
use crate::detector::{self, SignalDelta, DEFAULT_WINDOW_DAYS};
use crate::error::CoreError;
use crate::models::{Player, PredictionSnapshot, SignalEvent, SignalType, TransferEvent};
use crate::timeguard::{self, SignalEntity};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The key signals surfaced on the profile card.
const PROFILE_SIGNALS: [SignalType; 6] = [
    SignalType::MarketValue,
    SignalType::ContractMonthsRemaining,
    SignalType::GoalsLast10,
    SignalType::AssistsLast10,
    SignalType::SocialMentionVelocity,
    SignalType::UserAttentionVelocity,
];

#[derive(Debug, Serialize)]
pub struct PlayerDetail {
    #[serde(flatten)]
    pub player: Player,
    pub club_name: Option<String>,
    pub latest_signals: serde_json::Map<String, serde_json::Value>,
    pub predictions: Vec<PredictionSnapshot>,
    pub what_changed: Vec<SignalDelta>,
    pub transfer_history: Vec<TransferEvent>,
}

pub async fn get_player(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PlayerDetail>> {
    let player = state.store.require_player(id)?;
    let now = Utc::now();

    let club_name = match player.current_club_id {
        Some(club_id) => state.store.get_club(club_id)?.map(|c| c.name),
        None => None,
    };

    let mut latest_signals = serde_json::Map::new();
    for signal_type in PROFILE_SIGNALS {
        if let Some(at) =
            timeguard::latest_signal(&state.store, SignalEntity::Player(id), signal_type, now)?
        {
            latest_signals.insert(
                signal_type.as_str().to_string(),
                serde_json::json!({
                    "value": at.value,
                    "observed_at": at.observed_at,
                    "effective_from": at.effective_from,
                }),
            );
        }
    }

    let predictions = state.store.latest_predictions_for_player(id, None, 10)?;
    let what_changed = detector::what_changed(&state.store, id, DEFAULT_WINDOW_DAYS, now)?;
    let transfer_history = state.store.transfers_for_player(id)?;

    Ok(Json(PlayerDetail {
        player,
        club_name,
        latest_signals,
        predictions,
        what_changed,
        transfer_history,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SignalHistoryQuery {
    pub as_of: Option<String>,
    pub signal_type: Option<String>,
    pub limit: Option<usize>,
}

pub async fn get_player_signals(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<SignalHistoryQuery>,
) -> ApiResult<Json<Vec<SignalEvent>>> {
    state.store.require_player(id)?;

    let as_of = parse_as_of(params.as_of.as_deref())?;
    let signal_type = params
        .signal_type
        .as_deref()
        .map(|raw| {
            raw.parse::<SignalType>()
                .map_err(CoreError::Validation)
        })
        .transpose()?;
    let limit = params.limit.unwrap_or(state.config.default_page_size);

    let rows = state.store.signal_history(id, as_of, signal_type, limit)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct PredictionHistoryQuery {
    pub as_of: Option<String>,
    pub horizon_days: Option<i64>,
    pub limit: Option<usize>,
}

pub async fn get_player_predictions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<PredictionHistoryQuery>,
) -> ApiResult<Json<Vec<PredictionSnapshot>>> {
    state.store.require_player(id)?;

    let as_of = parse_as_of(params.as_of.as_deref())?;
    let limit = params.limit.unwrap_or(state.config.default_page_size);

    let rows = state
        .store
        .prediction_history(id, as_of, params.horizon_days, limit)?;
    Ok(Json(rows))
}
