//! Notification sink fed by the sync engine.
//!
//! Delivery is fire-and-forget: a slow consumer never holds a sync back, the
//! newest notifications are dropped once the buffer is full.

use tokio::sync::mpsc;

use crate::models::{Challenge, NewChallengeEvent, NewSolveEvent};

/// Receiver side of sync deltas.
pub trait NotificationSink: Send + Sync {
    fn notify_new_challenge(&self, challenge: &Challenge);
    fn notify_new_solve(&self, event: &NewSolveEvent);
}

/// A delta waiting to be announced.
#[derive(Debug, Clone)]
pub enum Notification {
    NewChallenge(NewChallengeEvent),
    NewSolve(NewSolveEvent),
}

/// Sink backed by a bounded channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    fn push(&self, notification: Notification) {
        if let Err(err) = self.tx.try_send(notification) {
            tracing::warn!("Dropping notification: {}", err);
        }
    }
}

impl NotificationSink for ChannelSink {
    fn notify_new_challenge(&self, challenge: &Challenge) {
        self.push(Notification::NewChallenge(NewChallengeEvent {
            challenge: challenge.clone(),
        }));
    }

    fn notify_new_solve(&self, event: &NewSolveEvent) {
        self.push(Notification::NewSolve(event.clone()));
    }
}

/// Consume notifications by logging them, standing in for the chat front-end.
pub async fn log_notifications(mut rx: mpsc::Receiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        match notification {
            Notification::NewChallenge(NewChallengeEvent { challenge }) => {
                tracing::info!(
                    id = challenge.id,
                    title = %challenge.title,
                    category = %challenge.category,
                    score = challenge.score,
                    "New challenge"
                );
            }
            Notification::NewSolve(event) => {
                tracing::info!(
                    author = %event.author.username,
                    challenge = %event.challenge.title,
                    first_blood = event.is_first_blood,
                    next_above = ?event.rank_gap_to_next.as_ref().map(|gap| &gap.username),
                    points_behind = ?event.rank_gap_to_next.as_ref().map(|gap| gap.points_behind),
                    "New solve"
                );
            }
        }
    }
}
