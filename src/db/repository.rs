//! Database repository for the mirrored platform state.
//!
//! Every logical operation runs in at most one transaction. Writes that race
//! between concurrent syncs use upserts or `INSERT OR IGNORE` instead of
//! read-then-write.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    Author, Challenge, KnownChallenge, RankGap, RemoteAuthor, RemoteSolve, Scoreboard,
    GLOBAL_SCOREBOARD,
};

const CHALLENGE_COLUMNS: &str =
    "id, title, category, description, score, difficulty, published_at, solver_count, premium";

/// A solve inserted by [`Repository::record_author_sync`].
#[derive(Debug, Clone)]
pub struct RecordedSolve {
    pub challenge: KnownChallenge,
    pub solved_at: NaiveDateTime,
    /// Tracked authors who solved the challenge, this one included
    pub tracked_solvers: i64,
}

/// Result of persisting one author sync.
#[derive(Debug, Clone)]
pub struct AuthorSyncWrite {
    pub author: Author,
    pub solves: Vec<RecordedSolve>,
    /// Lowest-scoring author strictly above `author`
    pub next_above: Option<RankGap>,
}

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== CHALLENGE OPERATIONS ====================

    /// Ids of every known challenge, premium ones included.
    pub async fn challenge_ids(&self) -> Result<HashSet<i64>, AppError> {
        let rows = sqlx::query("SELECT id FROM challenges")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    pub async fn count_challenges(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM challenges")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("total"))
    }

    pub async fn has_challenge(&self, id: i64) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT 1 FROM challenges WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Get a challenge by ID.
    pub async fn get_challenge(&self, id: i64) -> Result<Option<KnownChallenge>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM challenges WHERE id = ?", CHALLENGE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(challenge_from_row))
    }

    /// Insert or refresh a readable challenge. A premium placeholder with the
    /// same id is replaced.
    pub async fn upsert_challenge(&self, challenge: &Challenge) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO challenges
                   (id, title, category, description, score, difficulty, published_at, solver_count, premium)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
               ON CONFLICT(id) DO UPDATE SET
                   title = excluded.title,
                   category = excluded.category,
                   description = excluded.description,
                   score = excluded.score,
                   difficulty = excluded.difficulty,
                   published_at = excluded.published_at,
                   solver_count = excluded.solver_count,
                   premium = 0"#,
        )
        .bind(challenge.id)
        .bind(&challenge.title)
        .bind(&challenge.category)
        .bind(&challenge.description)
        .bind(challenge.score)
        .bind(&challenge.difficulty)
        .bind(challenge.published_at)
        .bind(challenge.solver_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that challenge `id` exists but is premium-only.
    pub async fn mark_premium(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("INSERT OR IGNORE INTO challenges (id, premium) VALUES (?, 1)")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Readable challenges whose title contains `query`.
    pub async fn search_challenges(&self, query: &str) -> Result<Vec<Challenge>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM challenges WHERE premium = 0 AND title LIKE ? ORDER BY title",
            CHALLENGE_COLUMNS
        ))
        .bind(format!("%{}%", query))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match challenge_from_row(row) {
                KnownChallenge::Available(challenge) => Some(challenge),
                KnownChallenge::Premium { .. } => None,
            })
            .collect())
    }

    /// Number of readable challenges per category.
    pub async fn category_stats(&self) -> Result<BTreeMap<String, i64>, AppError> {
        let rows = sqlx::query(
            "SELECT category, COUNT(*) AS total FROM challenges WHERE premium = 0 GROUP BY category",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("category"), row.get("total")))
            .collect())
    }

    // ==================== AUTHOR OPERATIONS ====================

    /// List all authors, best score first.
    pub async fn list_authors(&self) -> Result<Vec<Author>, AppError> {
        let rows = sqlx::query("SELECT id, username, score, rank FROM authors ORDER BY score DESC, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(author_from_row).collect())
    }

    pub async fn count_authors(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM authors")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("total"))
    }

    /// Get an author by ID.
    pub async fn get_author(&self, id: i64) -> Result<Option<Author>, AppError> {
        let row = sqlx::query("SELECT id, username, score, rank FROM authors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(author_from_row))
    }

    /// Tracked authors whose username contains `name`.
    pub async fn search_authors(&self, name: &str) -> Result<Vec<Author>, AppError> {
        let rows = sqlx::query(
            "SELECT id, username, score, rank FROM authors WHERE username LIKE ? ORDER BY score DESC",
        )
        .bind(format!("%{}%", name))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(author_from_row).collect())
    }

    pub async fn solved_challenge_ids(&self, author_id: i64) -> Result<HashSet<i64>, AppError> {
        let rows = sqlx::query("SELECT challenge_id FROM solves WHERE author_id = ?")
            .bind(author_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("challenge_id")).collect())
    }

    /// Start tracking an author with its current solves and add it to the
    /// global scoreboard. Solves on challenges missing locally are skipped.
    pub async fn create_author(&self, remote: &RemoteAuthor) -> Result<Author, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO authors (id, username, score, rank) VALUES (?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   username = excluded.username, score = excluded.score, rank = excluded.rank"#,
        )
        .bind(remote.id)
        .bind(&remote.username)
        .bind(remote.score)
        .bind(remote.rank)
        .execute(&mut *tx)
        .await?;

        for solve in &remote.solves {
            sqlx::query(
                r#"INSERT OR IGNORE INTO solves (author_id, challenge_id, solved_at)
                   SELECT ?, id, ? FROM challenges WHERE id = ?"#,
            )
            .bind(remote.id)
            .bind(solve.solved_at)
            .bind(solve.challenge_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("INSERT OR IGNORE INTO scoreboard_members (scoreboard_name, author_id) VALUES (?, ?)")
            .bind(GLOBAL_SCOREBOARD)
            .bind(remote.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(remote.author())
    }

    /// Persist the refreshed profile of a tracked author and its new solves.
    ///
    /// Tracked solvers of each challenge are counted after the insert, in the
    /// same transaction, so two authors solving the same challenge concurrently
    /// see distinct counts. Returns `None` if the author is no longer tracked.
    pub async fn record_author_sync(
        &self,
        remote: &RemoteAuthor,
        new_solves: &[RemoteSolve],
    ) -> Result<Option<AuthorSyncWrite>, AppError> {
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock before reading.
        let updated = sqlx::query("UPDATE authors SET username = ?, score = ?, rank = ? WHERE id = ?")
            .bind(&remote.username)
            .bind(remote.score)
            .bind(remote.rank)
            .bind(remote.id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let mut ordered: Vec<&RemoteSolve> = new_solves.iter().collect();
        ordered.sort_by_key(|solve| solve.challenge_id);

        let mut solves = Vec::new();
        for solve in ordered {
            let inserted = sqlx::query(
                r#"INSERT OR IGNORE INTO solves (author_id, challenge_id, solved_at)
                   SELECT ?, id, ? FROM challenges WHERE id = ?"#,
            )
            .bind(remote.id)
            .bind(solve.solved_at)
            .bind(solve.challenge_id)
            .execute(&mut *tx)
            .await?;
            if inserted.rows_affected() == 0 {
                continue;
            }

            let row = sqlx::query(&format!(
                "SELECT {} FROM challenges WHERE id = ?",
                CHALLENGE_COLUMNS
            ))
            .bind(solve.challenge_id)
            .fetch_one(&mut *tx)
            .await?;
            let tracked_solvers: i64 =
                sqlx::query("SELECT COUNT(*) AS total FROM solves WHERE challenge_id = ?")
                    .bind(solve.challenge_id)
                    .fetch_one(&mut *tx)
                    .await?
                    .get("total");

            solves.push(RecordedSolve {
                challenge: challenge_from_row(&row),
                solved_at: solve.solved_at,
                tracked_solvers,
            });
        }

        let next_above = sqlx::query(
            "SELECT username, score FROM authors WHERE score > ? ORDER BY score ASC LIMIT 1",
        )
        .bind(remote.score)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| {
            let score: i64 = row.get("score");
            RankGap {
                username: row.get("username"),
                score,
                points_behind: score - remote.score,
            }
        });

        tx.commit().await?;

        Ok(Some(AuthorSyncWrite {
            author: remote.author(),
            solves,
            next_above,
        }))
    }

    /// Stop tracking an author. Returns the removed row.
    pub async fn delete_author(&self, id: i64) -> Result<Option<Author>, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM solves WHERE author_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM scoreboard_members WHERE author_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query("DELETE FROM authors WHERE id = ? RETURNING id, username, score, rank")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.as_ref().map(author_from_row))
    }

    /// Solves of an author per category of readable challenges.
    pub async fn author_category_stats(&self, author_id: i64) -> Result<BTreeMap<String, i64>, AppError> {
        let rows = sqlx::query(
            r#"SELECT c.category AS category, COUNT(*) AS total
               FROM solves s JOIN challenges c ON c.id = s.challenge_id
               WHERE s.author_id = ? AND c.premium = 0
               GROUP BY c.category"#,
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("category"), row.get("total")))
            .collect())
    }

    // ==================== SCOREBOARD OPERATIONS ====================

    pub async fn list_scoreboards(&self) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query("SELECT name FROM scoreboards ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    /// Get a scoreboard with its members, best score first.
    pub async fn get_scoreboard(&self, name: &str) -> Result<Option<Scoreboard>, AppError> {
        let exists = sqlx::query("SELECT 1 FROM scoreboards WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            r#"SELECT a.id AS id, a.username AS username, a.score AS score, a.rank AS rank
               FROM scoreboard_members m JOIN authors a ON a.id = m.author_id
               WHERE m.scoreboard_name = ?
               ORDER BY a.score DESC, a.id"#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Scoreboard {
            name: name.to_string(),
            members: rows.iter().map(author_from_row).collect(),
        }))
    }

    /// Create a scoreboard. Returns false if it already existed.
    pub async fn create_scoreboard(&self, name: &str) -> Result<bool, AppError> {
        let result = sqlx::query("INSERT OR IGNORE INTO scoreboards (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a scoreboard and its memberships. The global scoreboard stays.
    pub async fn delete_scoreboard(&self, name: &str) -> Result<bool, AppError> {
        if name == GLOBAL_SCOREBOARD {
            return Err(AppError::Validation(
                "The global scoreboard cannot be removed".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM scoreboard_members WHERE scoreboard_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM scoreboards WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    /// Add an author to a scoreboard. Returns false if either is unknown.
    pub async fn add_to_scoreboard(&self, author_id: i64, name: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO scoreboard_members (scoreboard_name, author_id)
               SELECT s.name, a.id FROM scoreboards s, authors a
               WHERE s.name = ? AND a.id = ?"#,
        )
        .bind(name)
        .bind(author_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.is_member(author_id, name).await
    }

    /// Remove an author from a scoreboard. Returns false if it was not a member.
    pub async fn remove_from_scoreboard(&self, author_id: i64, name: &str) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM scoreboard_members WHERE scoreboard_name = ? AND author_id = ?")
                .bind(name)
                .bind(author_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_member(&self, author_id: i64, name: &str) -> Result<bool, AppError> {
        let row = sqlx::query(
            "SELECT 1 FROM scoreboard_members WHERE scoreboard_name = ? AND author_id = ?",
        )
        .bind(name)
        .bind(author_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

// Helper functions for row conversion

fn author_from_row(row: &SqliteRow) -> Author {
    Author {
        id: row.get("id"),
        username: row.get("username"),
        score: row.get("score"),
        rank: row.get("rank"),
    }
}

fn challenge_from_row(row: &SqliteRow) -> KnownChallenge {
    let id: i64 = row.get("id");
    let premium: i64 = row.get("premium");
    if premium != 0 {
        return KnownChallenge::Premium { id };
    }

    let title: Option<String> = row.get("title");
    let category: Option<String> = row.get("category");
    let description: Option<String> = row.get("description");
    let score: Option<i64> = row.get("score");
    let difficulty: Option<String> = row.get("difficulty");
    let published_at: Option<NaiveDateTime> = row.get("published_at");

    KnownChallenge::Available(Challenge {
        id,
        title: title.unwrap_or_default(),
        category: category.unwrap_or_default(),
        description: description.unwrap_or_default(),
        score: score.unwrap_or_default(),
        difficulty: difficulty.unwrap_or_default(),
        published_at: published_at.unwrap_or_default(),
        solver_count: row.get("solver_count"),
    })
}
