//! Request dispatch engine.
//!
//! Every outbound call to the remote platform goes through one [`Dispatcher`].
//! Callers enqueue a request with a priority and await its [`PendingRequest`];
//! a single worker task paces, sends, classifies and retries the requests one
//! at a time while honoring the global ban window.

mod ban;
mod queue;
mod rendezvous;
mod worker;

pub use ban::{BanReason, BanStatus};

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

/// Well-known priorities. Lower values are served first.
pub mod priority {
    /// Lookups a user is waiting on, and challenge backfills during a sync.
    pub const INTERACTIVE: i32 = 0;
    /// Periodic author refresh.
    pub const AUTHOR_SYNC: i32 = 1;
    /// Catalog walk and new challenge details.
    pub const CATALOG: i32 = 2;
}

/// HTTP method of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

/// An outbound request, immutable once enqueued.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub id: Uuid,
    pub target: String,
    pub params: Vec<(String, String)>,
    pub method: Method,
    pub priority: i32,
}

impl QueuedRequest {
    pub fn new(target: String, params: Vec<(String, String)>, method: Method, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            params,
            method,
            priority,
        }
    }
}

/// Body of a successful answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Decoded JSON body of a GET
    Json(serde_json::Value),
    /// A HEAD answered 200
    Present,
}

/// Terminal outcome of a request that reached the remote platform.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Found(T),
    /// The content exists but requires a premium key (HTTP 401)
    Premium,
    /// HTTP 404
    NotFound,
}

/// Failures surfaced to callers. Bans and transient network errors are
/// retried by the worker and never show up here.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("malformed response body from {target}: {message}")]
    Body { target: String, message: String },
    #[error("unexpected HTTP status {status} from {target}")]
    UnexpectedStatus { target: String, status: u16 },
    #[error("request to {target} could not be built: {message}")]
    Request { target: String, message: String },
    #[error("gave up on {target} after {attempts} attempts")]
    RetriesExhausted { target: String, attempts: u32 },
    #[error("dispatch worker is not running")]
    WorkerStopped,
}

pub type DispatchResult = Result<Outcome<Payload>, DispatchError>;

/// Timing and credential settings of the dispatch worker.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub api_key: Option<String>,
    /// Minimum spacing between the start of two requests
    pub pacing: Duration,
    /// Ban window after an HTTP 429
    pub rate_limit_ban: Duration,
    /// Ban window after an HTTP 403
    pub forbidden_ban: Duration,
    /// Pause after a connection reset, disconnect or timeout
    pub transient_backoff: Duration,
    pub request_timeout: Duration,
    /// Attempts per request before giving up, `None` for unbounded
    pub max_attempts: Option<u32>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            pacing: Duration::from_secs(5),
            rate_limit_ban: Duration::from_secs(10),
            forbidden_ban: Duration::from_secs(5 * 60 + 30),
            transient_backoff: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

pub(crate) struct Submission {
    request: QueuedRequest,
    respond_to: oneshot::Sender<DispatchResult>,
}

/// Handle to the dispatch worker. Cheap to clone; the worker stops once every
/// handle is dropped and its queue is drained.
#[derive(Clone)]
pub struct Dispatcher {
    inbox: mpsc::UnboundedSender<Submission>,
    ban: watch::Receiver<BanStatus>,
    pending: Arc<AtomicUsize>,
}

impl Dispatcher {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(config: DispatchConfig, http: reqwest::Client) -> Self {
        let (inbox, submissions) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let (worker, ban) = worker::Worker::new(config, http, submissions, pending.clone());
        tokio::spawn(worker.run());

        Self {
            inbox,
            ban,
            pending,
        }
    }

    /// Queue a request. The returned handle resolves once the worker reached a
    /// terminal outcome; dropping it cancels the request if not yet sent.
    pub fn enqueue(
        &self,
        target: impl Into<String>,
        params: Vec<(String, String)>,
        method: Method,
        priority: i32,
    ) -> PendingRequest {
        let request = QueuedRequest::new(target.into(), params, method, priority);
        let id = request.id;
        let (respond_to, rx) = oneshot::channel();

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.inbox.send(Submission { request, respond_to }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::error!(%id, "Dispatch worker is gone, request dropped");
        }

        PendingRequest { rx }
    }

    pub fn ban_status(&self) -> BanStatus {
        self.ban.borrow().clone()
    }

    /// Follow ban transitions, e.g. to reflect them in a presence indicator.
    pub fn subscribe_ban(&self) -> watch::Receiver<BanStatus> {
        self.ban.clone()
    }

    /// Requests enqueued but not yet delivered.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Future of an enqueued request.
pub struct PendingRequest {
    rx: oneshot::Receiver<DispatchResult>,
}

impl Future for PendingRequest {
    type Output = DispatchResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|delivered| delivered.unwrap_or(Err(DispatchError::WorkerStopped)))
    }
}
