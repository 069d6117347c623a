//! Scoreboard model.

use serde::{Deserialize, Serialize};

use super::Author;

/// Name of the scoreboard every tracked author belongs to.
pub const GLOBAL_SCOREBOARD: &str = "global";

/// A named group of authors, members ordered by descending score.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scoreboard {
    pub name: String,
    pub members: Vec<Author>,
}

/// Request body for creating a scoreboard.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateScoreboardRequest {
    pub name: String,
}
