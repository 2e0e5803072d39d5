//! Club read endpoints.

use super::{ApiResult, AppState};
use crate::models::{Club, Player, PredictionSnapshot, TransferEvent};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

const TRANSFER_WINDOW_DAYS: i64 = 365;
const PROBABILITY_LIST_LIMIT: usize = 20;

#[derive(Debug, Serialize)]
pub struct ClubDetail {
    #[serde(flatten)]
    pub club: Club,
    pub competition_name: Option<String>,
    pub tier: Option<i32>,
    pub squad: Vec<Player>,
    pub outgoing_predictions: Vec<PredictionSnapshot>,
    pub incoming_predictions: Vec<PredictionSnapshot>,
    pub transfers_in: Vec<TransferEvent>,
    pub transfers_out: Vec<TransferEvent>,
}

pub async fn get_club(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ClubDetail>> {
    let club = state.store.require_club(id)?;

    let competition_name = match club.competition_id {
        Some(comp_id) => state.store.get_competition(comp_id)?.map(|c| c.name),
        None => None,
    };
    let tier = state.store.club_tier(id)?;
    let squad = state.store.squad(id)?;

    let outgoing_predictions = state
        .store
        .latest_predictions_out_of_club(id, PROBABILITY_LIST_LIMIT)?;
    let incoming_predictions = state
        .store
        .latest_predictions_into_club(id, PROBABILITY_LIST_LIMIT)?;

    let since = (Utc::now() - Duration::days(TRANSFER_WINDOW_DAYS)).date_naive();
    let transfers_in = state.store.transfers_into_club(id, since)?;
    let transfers_out = state.store.transfers_out_of_club(id, since)?;

    Ok(Json(ClubDetail {
        club,
        competition_name,
        tier,
        squad,
        outgoing_predictions,
        incoming_predictions,
        transfers_in,
        transfers_out,
    }))
}
