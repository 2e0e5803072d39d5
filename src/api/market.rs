//! Ranked market probabilities from the `player_market_view` projection.

use super::{ApiResult, AppState};
use crate::store::{MarketRow, MarketViewFilter};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct MarketQuery {
    pub competition_id: Option<Uuid>,
    pub club_id: Option<Uuid>,
    pub horizon_days: Option<i64>,
    pub min_probability: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MarketResponse {
    pub rows: Vec<MarketRow>,
    pub count: usize,
}

pub async fn get_market_latest(
    State(state): State<AppState>,
    Query(params): Query<MarketQuery>,
) -> ApiResult<Json<MarketResponse>> {
    // First read after a cold start builds the projection.
    if !state.store.market_view_populated()? {
        state.store.refresh_market_view()?;
    }

    let filter = MarketViewFilter {
        competition_id: params.competition_id,
        club_id: params.club_id,
        horizon_days: params.horizon_days,
        min_probability: params.min_probability,
        limit: params.limit.unwrap_or(state.config.default_page_size),
    };
    let rows = state.store.market_latest(&filter)?;
    Ok(Json(MarketResponse {
        count: rows.len(),
        rows,
    }))
}
