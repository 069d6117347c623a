//! Dispatcher status endpoint.

use axum::extract::State;
use serde::Serialize;

use super::{success, ApiResult};
use crate::dispatch::BanStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStatus {
    pub ban: BanStatus,
    /// Requests enqueued and not answered yet
    pub pending_requests: usize,
    pub tracked_authors: i64,
    pub known_challenges: i64,
}

/// GET /api/status - Ban state and backlog of the dispatcher.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<DispatchStatus> {
    let dispatcher = state.engine.client().dispatcher();
    let tracked_authors = state.repo.count_authors().await?;
    let known_challenges = state.repo.count_challenges().await?;

    success(DispatchStatus {
        ban: dispatcher.ban_status(),
        pending_requests: dispatcher.pending(),
        tracked_authors,
        known_challenges,
    })
}
