//! Process-wide ban state.
//!
//! Owned by the dispatch worker. Observers follow transitions through a
//! `watch` channel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why the remote platform stopped serving us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BanReason {
    /// HTTP 429
    RateLimited,
    /// HTTP 403
    Forbidden,
}

/// Snapshot published to ban observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum BanStatus {
    Clear,
    #[serde(rename_all = "camelCase")]
    Banned {
        until: DateTime<Utc>,
        reason: BanReason,
    },
}

pub(crate) struct BanState {
    resume_at: Option<Instant>,
    status: watch::Sender<BanStatus>,
}

impl BanState {
    pub fn new() -> (Self, watch::Receiver<BanStatus>) {
        let (status, rx) = watch::channel(BanStatus::Clear);
        (
            Self {
                resume_at: None,
                status,
            },
            rx,
        )
    }

    /// Suspend all traffic for at least `window`. An already longer ban is kept.
    pub fn impose(&mut self, reason: BanReason, window: Duration) {
        let now = Instant::now();
        let resume_at = match self.resume_at {
            Some(current) if current > now + window => current,
            _ => now + window,
        };
        self.resume_at = Some(resume_at);

        let remaining = resume_at.saturating_duration_since(now);
        let until = Utc::now()
            + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
        tracing::warn!(
            ?reason,
            remaining_ms = remaining.as_millis() as u64,
            "Remote API ban in effect, suspending dispatch"
        );
        self.status.send_replace(BanStatus::Banned { until, reason });
    }

    /// Wait until the ban window (if any) has elapsed, then publish `Clear`.
    /// Returns whether a ban was in effect.
    pub async fn wait_clear(&mut self) -> bool {
        let Some(resume_at) = self.resume_at else {
            return false;
        };
        tokio::time::sleep_until(resume_at).await;
        self.resume_at = None;
        tracing::info!("Remote API ban lifted, resuming dispatch");
        self.status.send_replace(BanStatus::Clear);
        true
    }
}
