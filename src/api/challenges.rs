//! Challenge API endpoints.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{Challenge, KnownChallenge, NewChallengeEvent};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChallengeQuery {
    /// Substring of the title, empty for every challenge
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    /// Known challenges, premium ones included
    pub total: i64,
    pub categories: BTreeMap<String, i64>,
}

/// GET /api/challenges?q= - Readable challenges by title.
pub async fn list_challenges(
    State(state): State<AppState>,
    Query(query): Query<ChallengeQuery>,
) -> ApiResult<Vec<Challenge>> {
    success(state.repo.search_challenges(query.q.trim()).await?)
}

/// GET /api/challenges/:id - A known challenge or its premium placeholder.
pub async fn get_challenge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<KnownChallenge> {
    match state.repo.get_challenge(id).await? {
        Some(challenge) => success(challenge),
        None => Err(AppError::NotFound(format!("Challenge {} not found", id))),
    }
}

/// GET /api/stats - Catalog size per category.
pub async fn get_catalog_stats(State(state): State<AppState>) -> ApiResult<CatalogStats> {
    let total = state.repo.count_challenges().await?;
    let categories = state.repo.category_stats().await?;
    success(CatalogStats { total, categories })
}

/// POST /api/sync/catalog - Run a catalog sync now.
pub async fn sync_catalog(State(state): State<AppState>) -> ApiResult<Vec<NewChallengeEvent>> {
    success(state.engine.sync_catalog().await?)
}
