//! Author API endpoints.

use std::collections::{BTreeMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{AddAuthorRequest, Author, NewSolveEvent};
use crate::AppState;

/// Remote search hit.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAuthorView {
    #[serde(flatten)]
    pub author: Author,
    pub solve_count: usize,
    /// Whether the author is already tracked locally
    pub tracked: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorStats {
    pub author: Author,
    /// Solved readable challenges per category
    pub categories: BTreeMap<String, i64>,
    pub total_solves: i64,
}

#[derive(Debug, Serialize)]
pub struct AvatarView {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthorSearchQuery {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthorFilter {
    pub name: Option<String>,
}

/// GET /api/authors - Tracked authors, best score first, optionally filtered by name.
pub async fn list_authors(
    State(state): State<AppState>,
    Query(filter): Query<AuthorFilter>,
) -> ApiResult<Vec<Author>> {
    let authors = match filter.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => state.repo.search_authors(name).await?,
        _ => state.repo.list_authors().await?,
    };
    success(authors)
}

/// POST /api/authors - Start tracking an author.
pub async fn add_author(
    State(state): State<AppState>,
    Json(request): Json<AddAuthorRequest>,
) -> ApiResult<Author> {
    if request.id <= 0 {
        return Err(AppError::Validation("Author id must be positive".to_string()));
    }

    match state.engine.add_user(request.id).await? {
        Some(author) => success(author),
        None => Err(not_found(request.id)),
    }
}

/// GET /api/authors/:id - Get a tracked author.
pub async fn get_author(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Author> {
    state
        .repo
        .get_author(id)
        .await?
        .map(super::ApiResponse::new)
        .ok_or_else(|| not_found(id))
}

/// DELETE /api/authors/:id - Stop tracking an author.
pub async fn delete_author(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Author> {
    match state.engine.remove_user(id).await? {
        Some(author) => success(author),
        None => Err(not_found(id)),
    }
}

/// GET /api/authors/:id/avatar - Avatar URL on the remote platform.
pub async fn get_avatar(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<AvatarView> {
    let url = state.engine.client().avatar_url(id).await?;
    success(AvatarView { url })
}

/// GET /api/authors/:id/stats - Solves per category.
pub async fn get_author_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<AuthorStats> {
    let author = state.repo.get_author(id).await?.ok_or_else(|| not_found(id))?;
    let categories = state.repo.author_category_stats(id).await?;
    let total_solves = categories.values().sum();

    success(AuthorStats {
        author,
        categories,
        total_solves,
    })
}

/// GET /api/authors/search?name= - Search authors on the remote platform.
pub async fn search_remote_authors(
    State(state): State<AppState>,
    Query(query): Query<AuthorSearchQuery>,
) -> ApiResult<Vec<RemoteAuthorView>> {
    let name = query.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Search name is required".to_string()));
    }

    let tracked: HashSet<i64> = state
        .repo
        .list_authors()
        .await?
        .iter()
        .map(|author| author.id)
        .collect();

    let found = state.engine.search_user(name).await?;
    success(
        found
            .into_iter()
            .map(|remote| RemoteAuthorView {
                tracked: tracked.contains(&remote.id),
                solve_count: remote.solves.len(),
                author: remote.author(),
            })
            .collect(),
    )
}

/// POST /api/authors/:id/sync - Sync one author right away.
pub async fn sync_author(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<NewSolveEvent>> {
    if state.repo.get_author(id).await?.is_none() {
        return Err(not_found(id));
    }
    success(state.engine.sync_author(id).await?)
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("Author {} not found", id))
}
