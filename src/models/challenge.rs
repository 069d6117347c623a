//! Challenge models.

use chrono::NaiveDateTime;
use serde::Serialize;

/// A challenge whose content is readable with the configured API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub description: String,
    pub score: i64,
    pub difficulty: String,
    pub published_at: NaiveDateTime,
    /// Platform-wide validations when last fetched
    pub solver_count: i64,
}

/// Any challenge row of the local catalog.
///
/// Premium challenges are known to exist but their content is not served
/// without a premium key; they stay in the catalog so that later syncs do not
/// consider them new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum KnownChallenge {
    Available(Challenge),
    Premium { id: i64 },
}

/// Catalog entry listed on a catalog page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeStub {
    pub id: i64,
    pub title: String,
}

/// One decoded catalog page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage {
    pub challenges: Vec<ChallengeStub>,
    pub has_next: bool,
}
