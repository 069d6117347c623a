//! Scoreboard API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{CreateScoreboardRequest, Scoreboard};
use crate::AppState;

/// GET /api/scoreboards - Names of every scoreboard.
pub async fn list_scoreboards(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    success(state.repo.list_scoreboards().await?)
}

/// POST /api/scoreboards - Create an empty scoreboard.
pub async fn create_scoreboard(
    State(state): State<AppState>,
    Json(request): Json<CreateScoreboardRequest>,
) -> ApiResult<Scoreboard> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Scoreboard name is required".to_string()));
    }

    if !state.repo.create_scoreboard(name).await? {
        return Err(AppError::Validation(format!(
            "Scoreboard {} already exists",
            name
        )));
    }

    load(&state, name).await
}

/// GET /api/scoreboards/:name - Members ranked by score.
pub async fn get_scoreboard(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Scoreboard> {
    load(&state, &name).await
}

/// DELETE /api/scoreboards/:name - Remove a scoreboard.
pub async fn delete_scoreboard(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<()> {
    if !state.repo.delete_scoreboard(&name).await? {
        return Err(not_found(&name));
    }
    success(())
}

/// PUT /api/scoreboards/:name/members/:id - Add a tracked author.
pub async fn add_member(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> ApiResult<Scoreboard> {
    if !state.repo.add_to_scoreboard(id, &name).await? {
        return Err(AppError::NotFound(format!(
            "Scoreboard {} or author {} not found",
            name, id
        )));
    }
    load(&state, &name).await
}

/// DELETE /api/scoreboards/:name/members/:id - Remove an author.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> ApiResult<Scoreboard> {
    if !state.repo.remove_from_scoreboard(id, &name).await? {
        return Err(AppError::NotFound(format!(
            "Author {} is not on scoreboard {}",
            id, name
        )));
    }
    load(&state, &name).await
}

async fn load(state: &AppState, name: &str) -> ApiResult<Scoreboard> {
    match state.repo.get_scoreboard(name).await? {
        Some(scoreboard) => success(scoreboard),
        None => Err(not_found(name)),
    }
}

fn not_found(name: &str) -> AppError {
    AppError::NotFound(format!("Scoreboard {} not found", name))
}
