//! Fuzzy search over players and clubs.

use super::{ApiResult, AppState};
use crate::store::SearchHit;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub count: usize,
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let limit = params.limit.unwrap_or(state.config.default_page_size);
    let results = state.store.search(&params.q, limit)?;
    Ok(Json(SearchResponse {
        count: results.len(),
        results,
    }))
}
