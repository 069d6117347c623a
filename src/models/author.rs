//! Author (player profile) models.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A tracked player, as persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: i64,
    pub username: String,
    pub score: i64,
    /// Global position, 0 when the platform does not rank the account
    pub rank: i64,
}

/// A full author profile as reported by the remote platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAuthor {
    pub id: i64,
    pub username: String,
    pub score: i64,
    pub rank: i64,
    pub solves: Vec<RemoteSolve>,
}

impl RemoteAuthor {
    /// The persisted view of this profile.
    pub fn author(&self) -> Author {
        Author {
            id: self.id,
            username: self.username.clone(),
            score: self.score,
            rank: self.rank,
        }
    }
}

/// One validation listed on a remote profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSolve {
    pub challenge_id: i64,
    pub solved_at: NaiveDateTime,
}

/// Search hit returned by the author search endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorStub {
    pub id: i64,
    pub username: String,
}

/// Request body for tracking a new author.
#[derive(Debug, Clone, Deserialize)]
pub struct AddAuthorRequest {
    pub id: i64,
}
