//! Database module for SQLite persistence.
//!
//! SQLite holds the last known state of the remote platform.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // The data directory may not exist on first start
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Premium challenges are stored with `premium = 1` and no content.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS challenges (
            id INTEGER PRIMARY KEY,
            title TEXT,
            category TEXT,
            description TEXT,
            score INTEGER,
            difficulty TEXT,
            published_at TEXT,
            solver_count INTEGER NOT NULL DEFAULT 0,
            premium INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS authors (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL,
            score INTEGER NOT NULL DEFAULT 0,
            rank INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS solves (
            author_id INTEGER NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            challenge_id INTEGER NOT NULL REFERENCES challenges(id),
            solved_at TEXT NOT NULL,
            PRIMARY KEY (author_id, challenge_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scoreboards (
            name TEXT PRIMARY KEY
        );

        INSERT OR IGNORE INTO scoreboards (name) VALUES ('global');
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scoreboard_members (
            scoreboard_name TEXT NOT NULL REFERENCES scoreboards(name) ON DELETE CASCADE,
            author_id INTEGER NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            PRIMARY KEY (scoreboard_name, author_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Lookups by name and the rank gap query
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_authors_score ON authors(score);
        CREATE INDEX IF NOT EXISTS idx_authors_username ON authors(username);
        CREATE INDEX IF NOT EXISTS idx_challenges_title ON challenges(title);
        CREATE INDEX IF NOT EXISTS idx_solves_challenge ON solves(challenge_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
