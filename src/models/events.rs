//! Delta events produced by the sync engine.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::{Author, Challenge};

/// A challenge that appeared in the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChallengeEvent {
    pub challenge: Challenge,
}

/// The closest author ranked above a scorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankGap {
    pub username: String,
    pub score: i64,
    pub points_behind: i64,
}

/// A challenge validated by a tracked author since the previous sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSolveEvent {
    pub author: Author,
    pub challenge: Challenge,
    pub solved_at: NaiveDateTime,
    /// `None` when nobody scores more than the author
    pub rank_gap_to_next: Option<RankGap>,
    pub is_first_blood: bool,
}
