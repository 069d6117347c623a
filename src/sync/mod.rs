//! Synchronization engine.
//!
//! Pulls the remote state through the dispatcher, diffs it against the local
//! store, persists the delta and forwards it to the notification sink.

mod notify;

pub use notify::*;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;

use crate::db::Repository;
use crate::dispatch::{priority, Outcome};
use crate::errors::AppError;
use crate::models::{
    Author, Challenge, KnownChallenge, NewChallengeEvent, NewSolveEvent, RemoteAuthor, RemoteSolve,
};
use crate::rootme::{ClientError, RootMeClient};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] AppError),
}

/// Result of syncing a single challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeSync {
    Stored(Challenge),
    /// Recorded as existing but unreadable
    Premium,
    /// Unknown upstream, nothing recorded
    Missing,
}

#[derive(Clone)]
pub struct SyncEngine {
    client: RootMeClient,
    repo: Arc<Repository>,
    sink: Arc<dyn NotificationSink>,
    first_blood_threshold: i64,
}

impl SyncEngine {
    pub fn new(
        client: RootMeClient,
        repo: Arc<Repository>,
        sink: Arc<dyn NotificationSink>,
        first_blood_threshold: i64,
    ) -> Self {
        Self {
            client,
            repo,
            sink,
            first_blood_threshold,
        }
    }

    pub fn client(&self) -> &RootMeClient {
        &self.client
    }

    /// Fetch the whole catalog and store every challenge not known yet.
    ///
    /// Premium challenges are recorded as such and never fetched again. The
    /// first run against an empty store is an import and is not announced.
    pub async fn sync_catalog(&self) -> Result<Vec<NewChallengeEvent>, SyncError> {
        let remote = self.client.fetch_catalog(priority::CATALOG).await?;
        let known = self.repo.challenge_ids().await?;
        let announce = !known.is_empty();

        let fresh: BTreeSet<i64> = remote
            .iter()
            .map(|stub| stub.id)
            .filter(|id| !known.contains(id))
            .collect();
        tracing::info!(remote = remote.len(), new = fresh.len(), "Catalog fetched");
        for stub in remote.iter().filter(|stub| fresh.contains(&stub.id)) {
            tracing::debug!(id = stub.id, title = %stub.title, "New catalog entry");
        }

        let mut tasks = JoinSet::new();
        for id in fresh {
            let engine = self.clone();
            tasks.spawn(async move { (id, engine.sync_challenge(id, priority::CATALOG).await) });
        }

        let mut events = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(ChallengeSync::Stored(challenge)))) => {
                    if announce {
                        self.sink.notify_new_challenge(&challenge);
                    }
                    events.push(NewChallengeEvent { challenge });
                }
                Ok((_, Ok(_))) => {}
                Ok((id, Err(err))) => tracing::warn!(id, error = %err, "Could not sync challenge"),
                Err(err) => tracing::error!("Challenge sync task failed: {}", err),
            }
        }

        events.sort_by_key(|event| event.challenge.id);
        Ok(events)
    }

    /// Fetch one challenge and store it, or its premium placeholder.
    pub async fn sync_challenge(&self, id: i64, priority: i32) -> Result<ChallengeSync, SyncError> {
        match self.client.get_challenge(id, priority).await? {
            Outcome::Found(challenge) => {
                self.repo.upsert_challenge(&challenge).await?;
                tracing::debug!(id, title = %challenge.title, "Stored challenge");
                Ok(ChallengeSync::Stored(challenge))
            }
            Outcome::Premium => {
                tracing::info!(id, "Premium challenge, recording it as unavailable");
                self.repo.mark_premium(id).await?;
                Ok(ChallengeSync::Premium)
            }
            Outcome::NotFound => {
                tracing::warn!(id, "Challenge listed but not found upstream");
                Ok(ChallengeSync::Missing)
            }
        }
    }

    /// Refresh a tracked author and report the challenges solved since the
    /// previous sync. Untracked or vanished authors yield no event.
    pub async fn sync_author(&self, id: i64) -> Result<Vec<NewSolveEvent>, SyncError> {
        let Some(known) = self.repo.get_author(id).await? else {
            tracing::debug!(id, "Author is not tracked, skipping sync");
            return Ok(Vec::new());
        };

        let remote = match self.client.get_author(id, priority::AUTHOR_SYNC).await? {
            Outcome::Found(remote) => remote,
            Outcome::Premium | Outcome::NotFound => {
                tracing::info!(id, username = %known.username, "Author not found upstream");
                return Ok(Vec::new());
            }
        };

        let solved = self.repo.solved_challenge_ids(id).await?;
        let new_solves: Vec<RemoteSolve> = remote
            .solves
            .iter()
            .filter(|solve| !solved.contains(&solve.challenge_id))
            .cloned()
            .collect();
        if new_solves.is_empty() && known == remote.author() {
            return Ok(Vec::new());
        }

        self.backfill(&new_solves).await?;

        let Some(write) = self.repo.record_author_sync(&remote, &new_solves).await? else {
            tracing::info!(id, "Author removed during sync");
            return Ok(Vec::new());
        };

        let events: Vec<NewSolveEvent> = write
            .solves
            .into_iter()
            .filter_map(|solve| match solve.challenge {
                KnownChallenge::Available(challenge) => Some(NewSolveEvent {
                    author: write.author.clone(),
                    challenge,
                    solved_at: solve.solved_at,
                    rank_gap_to_next: write.next_above.clone(),
                    is_first_blood: solve.tracked_solvers <= self.first_blood_threshold,
                }),
                // Nothing to show for premium content.
                KnownChallenge::Premium { .. } => None,
            })
            .collect();

        for event in &events {
            self.sink.notify_new_solve(event);
        }
        if !events.is_empty() {
            tracing::info!(id, username = %write.author.username, solves = events.len(), "New solves");
        }

        Ok(events)
    }

    /// Sync every tracked author concurrently. Failures are logged per author.
    pub async fn update_users(&self) -> Result<Vec<NewSolveEvent>, SyncError> {
        let authors = self.repo.list_authors().await?;

        let mut tasks = JoinSet::new();
        for author in authors {
            let engine = self.clone();
            tasks.spawn(async move { (author.id, engine.sync_author(author.id).await) });
        }

        let mut events = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(author_events))) => events.extend(author_events),
                Ok((id, Err(err))) => tracing::warn!(id, error = %err, "Could not sync author"),
                Err(err) => tracing::error!("Author sync task failed: {}", err),
            }
        }

        Ok(events)
    }

    /// Start tracking author `id`. Returns the existing row if already tracked,
    /// `None` if the author does not exist upstream.
    pub async fn add_user(&self, id: i64) -> Result<Option<Author>, SyncError> {
        if let Some(existing) = self.repo.get_author(id).await? {
            return Ok(Some(existing));
        }

        let remote = match self.client.get_author(id, priority::INTERACTIVE).await? {
            Outcome::Found(remote) => remote,
            Outcome::Premium | Outcome::NotFound => return Ok(None),
        };

        self.backfill(&remote.solves).await?;
        let author = self.repo.create_author(&remote).await?;
        tracing::info!(id, username = %author.username, "Tracking new author");
        Ok(Some(author))
    }

    pub async fn remove_user(&self, id: i64) -> Result<Option<Author>, SyncError> {
        let removed = self.repo.delete_author(id).await?;
        if let Some(author) = &removed {
            tracing::info!(id, username = %author.username, "Stopped tracking author");
        }
        Ok(removed)
    }

    /// Full profiles of every remote author matching `name`.
    pub async fn search_user(&self, name: &str) -> Result<Vec<RemoteAuthor>, SyncError> {
        let stubs = self.client.search_authors(name, priority::INTERACTIVE).await?;

        let mut tasks = JoinSet::new();
        for (position, stub) in stubs.into_iter().enumerate() {
            tracing::debug!(id = stub.id, username = %stub.username, "Search hit");
            let client = self.client.clone();
            tasks.spawn(async move { (position, client.get_author(stub.id, priority::INTERACTIVE).await) });
        }

        let mut found = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, Ok(Outcome::Found(author)))) => found.push((position, author)),
                Ok((_, Ok(_))) => {}
                Ok((_, Err(err))) => return Err(err.into()),
                Err(err) => return Err(AppError::Internal(err.to_string()).into()),
            }
        }

        found.sort_by_key(|(position, _)| *position);
        Ok(found.into_iter().map(|(_, author)| author).collect())
    }

    /// Catalog sync then author sync, every `interval`.
    pub async fn run_scheduler(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.sync_catalog().await {
                Ok(events) => tracing::info!(new = events.len(), "Catalog sync done"),
                Err(err) => tracing::warn!(error = %err, "Catalog sync failed"),
            }
            match self.update_users().await {
                Ok(events) => tracing::info!(new = events.len(), "Author sync done"),
                Err(err) => tracing::warn!(error = %err, "Author sync failed"),
            }
        }
    }

    /// Fetch the challenges referenced by `solves` that are missing locally.
    async fn backfill(&self, solves: &[RemoteSolve]) -> Result<(), SyncError> {
        let ids: BTreeSet<i64> = solves.iter().map(|solve| solve.challenge_id).collect();
        for id in ids {
            if self.repo.has_challenge(id).await? {
                continue;
            }
            // A failed backfill leaves the solve out; the next sync retries it.
            if let Err(err) = self.sync_challenge(id, priority::INTERACTIVE).await {
                tracing::warn!(id, error = %err, "Could not backfill challenge");
            }
        }
        Ok(())
    }
}
