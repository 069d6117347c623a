//! The single dispatch loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use reqwest::{header, StatusCode};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::ban::{BanReason, BanState, BanStatus};
use super::queue::{Entry, RequestQueue};
use super::rendezvous::Rendezvous;
use super::{
    DispatchConfig, DispatchError, DispatchResult, Method, Outcome, Payload, QueuedRequest,
    Submission,
};

/// Classification of one send.
enum Attempt {
    Done(DispatchResult),
    Banned(BanReason),
    Transient(String),
}

pub(crate) struct Worker {
    config: DispatchConfig,
    http: reqwest::Client,
    submissions: mpsc::UnboundedReceiver<Submission>,
    queue: RequestQueue,
    slots: Rendezvous,
    ban: BanState,
    last_sent: Option<Instant>,
    pending: Arc<AtomicUsize>,
}

impl Worker {
    pub fn new(
        config: DispatchConfig,
        http: reqwest::Client,
        submissions: mpsc::UnboundedReceiver<Submission>,
        pending: Arc<AtomicUsize>,
    ) -> (Self, watch::Receiver<BanStatus>) {
        let (ban, observer) = BanState::new();
        let worker = Self {
            config,
            http,
            submissions,
            queue: RequestQueue::new(),
            slots: Rendezvous::new(),
            ban,
            last_sent: None,
            pending,
        };
        (worker, observer)
    }

    pub async fn run(mut self) {
        tracing::info!(pacing_ms = self.config.pacing.as_millis() as u64, "Dispatch worker started");

        loop {
            if self.queue.is_empty() {
                match self.submissions.recv().await {
                    Some(submission) => self.accept(submission),
                    None => break,
                }
            }

            if self.ban.wait_clear().await {
                // Pacing restarts from the end of the ban.
                self.last_sent = Some(Instant::now());
            }
            self.pace().await;
            // Pick the best request only once we are allowed to send.
            self.drain_submissions();

            let Some(entry) = self.queue.pop() else {
                continue;
            };

            if self.slots.is_abandoned(&entry.request.id) {
                tracing::debug!(id = %entry.request.id, "Caller went away, dropping request");
                self.slots.discard(&entry.request.id);
                self.pending.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            self.dispatch(entry).await;
        }

        tracing::info!("Dispatch worker stopped");
    }

    fn accept(&mut self, submission: Submission) {
        let Submission {
            request,
            respond_to,
        } = submission;
        self.slots.register(request.id, respond_to);
        self.queue.push(request);
    }

    fn drain_submissions(&mut self) {
        while let Ok(submission) = self.submissions.try_recv() {
            self.accept(submission);
        }
    }

    async fn pace(&self) {
        if let Some(last_sent) = self.last_sent {
            tokio::time::sleep_until(last_sent + self.config.pacing).await;
        }
    }

    async fn dispatch(&mut self, entry: Entry) {
        tracing::debug!(
            id = %entry.request.id,
            target = %entry.request.target,
            priority = entry.request.priority,
            attempt = entry.attempts + 1,
            queued = self.queue.len(),
            "Sending request"
        );

        self.last_sent = Some(Instant::now());
        match self.send(&entry.request).await {
            Attempt::Done(result) => self.deliver(&entry.request, result),
            Attempt::Banned(reason) => {
                let window = match reason {
                    BanReason::RateLimited => self.config.rate_limit_ban,
                    BanReason::Forbidden => self.config.forbidden_ban,
                };
                self.ban.impose(reason, window);
                self.retry(entry);
            }
            Attempt::Transient(message) => {
                tracing::warn!(
                    target = %entry.request.target,
                    error = %message,
                    "Transient failure, backing off"
                );
                if self.retry(entry) {
                    tokio::time::sleep(self.config.transient_backoff).await;
                }
            }
        }
    }

    /// Put the entry back in the queue unless its retry budget is spent.
    fn retry(&mut self, mut entry: Entry) -> bool {
        entry.attempts += 1;
        if let Some(max) = self.config.max_attempts {
            if entry.attempts >= max {
                let error = DispatchError::RetriesExhausted {
                    target: entry.request.target.clone(),
                    attempts: entry.attempts,
                };
                tracing::error!(id = %entry.request.id, "{}", error);
                self.deliver(&entry.request, Err(error));
                return false;
            }
        }
        self.queue.requeue(entry);
        true
    }

    fn deliver(&mut self, request: &QueuedRequest, result: DispatchResult) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        if !self.slots.deliver(&request.id, result) {
            tracing::debug!(id = %request.id, "Result ready but caller went away");
        }
    }

    async fn send(&self, request: &QueuedRequest) -> Attempt {
        let builder = match request.method {
            Method::Get => self.http.get(&request.target),
            Method::Head => self.http.head(&request.target),
        };

        // Cache buster, fresh on every attempt.
        let stamp = Utc::now().timestamp().to_string();
        let mut builder = builder
            .query(&request.params)
            .query(&[(stamp.as_str(), stamp.as_str())])
            .timeout(self.config.request_timeout);
        if let Some(key) = &self.config.api_key {
            builder = builder.header(header::COOKIE, format!("api_key={}", key));
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) if err.is_builder() => {
                return Attempt::Done(Err(DispatchError::Request {
                    target: request.target.clone(),
                    message: err.to_string(),
                }));
            }
            Err(err) => return Attempt::Transient(err.to_string()),
        };

        match response.status() {
            status if status.is_success() => match request.method {
                Method::Head => Attempt::Done(Ok(Outcome::Found(Payload::Present))),
                Method::Get => read_json(request, response).await,
            },
            StatusCode::UNAUTHORIZED => Attempt::Done(Ok(Outcome::Premium)),
            StatusCode::NOT_FOUND => Attempt::Done(Ok(Outcome::NotFound)),
            StatusCode::TOO_MANY_REQUESTS => Attempt::Banned(BanReason::RateLimited),
            StatusCode::FORBIDDEN => Attempt::Banned(BanReason::Forbidden),
            status if status.is_server_error() => Attempt::Transient(format!("HTTP {}", status)),
            status => Attempt::Done(Err(DispatchError::UnexpectedStatus {
                target: request.target.clone(),
                status: status.as_u16(),
            })),
        }
    }
}

async fn read_json(request: &QueuedRequest, response: reqwest::Response) -> Attempt {
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        // Truncated payloads are retried like a dropped connection.
        Err(err) => return Attempt::Transient(err.to_string()),
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Attempt::Done(Ok(Outcome::Found(Payload::Json(value)))),
        Err(err) => Attempt::Done(Err(DispatchError::Body {
            target: request.target.clone(),
            message: err.to_string(),
        })),
    }
}
