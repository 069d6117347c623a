//! Root-Me mirror
//!
//! Keeps a local SQLite copy of the Root-Me catalog and of a set of tracked
//! authors, announces new challenges and new solves, and exposes an admin REST
//! API. Every outbound call goes through one paced, ban-aware dispatcher.

mod api;
mod auth;
mod config;
mod db;
mod dispatch;
mod errors;
mod models;
mod rootme;
mod sync;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use dispatch::{BanStatus, Dispatcher};
use rootme::RootMeClient;
use sync::{ChannelSink, SyncEngine};

/// Buffered notifications before new ones are dropped.
const NOTIFICATION_BUFFER: usize = 256;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub engine: SyncEngine,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Root-Me mirror");
    tracing::info!("Remote API: {}", config.api_url);
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_key.is_none() {
        tracing::warn!("No Root-Me API key configured (ROOTME_API_KEY). Requests are anonymous");
    }
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (ROOTME_API_PSK). Authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Outbound pipeline
    let http = reqwest::Client::builder()
        .user_agent(concat!("rootme-sync/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let dispatcher = Dispatcher::spawn(config.dispatch(), http);
    tokio::spawn(watch_ban(dispatcher.subscribe_ban()));

    let client = RootMeClient::new(
        dispatcher,
        config.api_url.clone(),
        config.image_url.clone(),
        config.lang.clone(),
    );

    let (sink, notifications) = ChannelSink::new(NOTIFICATION_BUFFER);
    tokio::spawn(sync::log_notifications(notifications));

    let engine = SyncEngine::new(
        client,
        repo.clone(),
        Arc::new(sink),
        config.first_blood_threshold,
    );
    tokio::spawn(engine.clone().run_scheduler(config.sync_interval));
    tracing::info!("Sync scheduled every {:?}", config.sync_interval);

    let state = AppState {
        repo,
        engine,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Log every ban transition.
async fn watch_ban(mut ban: watch::Receiver<BanStatus>) {
    while ban.changed().await.is_ok() {
        match &*ban.borrow_and_update() {
            BanStatus::Banned { until, reason } => {
                tracing::warn!(?reason, %until, "Remote access suspended")
            }
            BanStatus::Clear => tracing::info!("Remote access resumed"),
        }
    }
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        .route("/status", get(api::get_status))
        // Authors
        .route("/authors", get(api::list_authors).post(api::add_author))
        .route("/authors/search", get(api::search_remote_authors))
        .route("/authors/{id}", get(api::get_author).delete(api::delete_author))
        .route("/authors/{id}/avatar", get(api::get_avatar))
        .route("/authors/{id}/stats", get(api::get_author_stats))
        .route("/authors/{id}/sync", post(api::sync_author))
        // Challenges
        .route("/challenges", get(api::list_challenges))
        .route("/challenges/{id}", get(api::get_challenge))
        .route("/stats", get(api::get_catalog_stats))
        .route("/sync/catalog", post(api::sync_catalog))
        // Scoreboards
        .route(
            "/scoreboards",
            get(api::list_scoreboards).post(api::create_scoreboard),
        )
        .route(
            "/scoreboards/{name}",
            get(api::get_scoreboard).delete(api::delete_scoreboard),
        )
        .route(
            "/scoreboards/{name}/members/{id}",
            put(api::add_member).delete(api::remove_member),
        )
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
