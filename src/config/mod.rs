//! Configuration module for the Root-Me mirror.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::DispatchConfig;
use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root-Me API key, sent as the `api_key` cookie
    pub api_key: Option<String>,
    /// Base URL of the remote API
    pub api_url: String,
    /// Base URL of the avatar images
    pub image_url: String,
    /// Language passed to author searches
    pub lang: String,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the admin API to
    pub bind_addr: SocketAddr,
    /// Pre-shared key for admin API authentication
    pub api_psk: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
    /// Minimum spacing between two outbound requests
    pub pacing: Duration,
    /// Timeout of a single outbound request
    pub request_timeout: Duration,
    /// Retry budget per request, `None` retries forever
    pub max_attempts: Option<u32>,
    /// Period of the background synchronization loop
    pub sync_interval: Duration,
    /// A solve is first blood while the challenge had at most this many solvers
    pub first_blood_threshold: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_key = env::var("ROOTME_API_KEY").ok().filter(|k| !k.is_empty());
        let api_psk = env::var("ROOTME_API_PSK").ok().filter(|k| !k.is_empty());

        let api_url = env::var("ROOTME_API_URL")
            .unwrap_or_else(|_| "https://api.www.root-me.org".to_string())
            .trim_end_matches('/')
            .to_string();

        let image_url = env::var("ROOTME_IMAGE_URL")
            .unwrap_or_else(|_| "https://www.root-me.org/IMG".to_string())
            .trim_end_matches('/')
            .to_string();

        let lang = env::var("ROOTME_LANG").unwrap_or_else(|_| "fr".to_string());

        let db_path = env::var("ROOTME_DB_PATH")
            .unwrap_or_else(|_| "./data/rootme.sqlite".to_string())
            .into();

        let bind_addr = parse_var("ROOTME_BIND_ADDR", "127.0.0.1:8080".parse().ok())?;
        let log_level = env::var("ROOTME_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = parse_var("ROOTME_LOG_JSON", Some(false))?;

        let pacing = Duration::from_millis(parse_var("ROOTME_PACING_MS", Some(5_000))?);
        let request_timeout =
            Duration::from_secs(parse_var("ROOTME_REQUEST_TIMEOUT_SECS", Some(30))?);
        let max_attempts = match parse_var::<u32>("ROOTME_MAX_ATTEMPTS", Some(0))? {
            0 => None,
            n => Some(n),
        };
        let sync_interval = Duration::from_secs(parse_var("ROOTME_SYNC_INTERVAL_SECS", Some(60))?);
        let first_blood_threshold = parse_var("ROOTME_FIRST_BLOOD_THRESHOLD", Some(3))?;

        Ok(Self {
            api_key,
            api_url,
            image_url,
            lang,
            db_path,
            bind_addr,
            api_psk,
            log_level,
            log_json,
            pacing,
            request_timeout,
            max_attempts,
            sync_interval,
            first_blood_threshold,
        })
    }

    /// Dispatcher settings derived from this configuration.
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            api_key: self.api_key.clone(),
            pacing: self.pacing,
            request_timeout: self.request_timeout,
            max_attempts: self.max_attempts,
            ..DispatchConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: Option<T>) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid {} value: {:?}", key, raw))),
        Err(_) => default.ok_or_else(|| AppError::Config(format!("{} is required", key))),
    }
}
