//! Typed access to the Root-Me API.
//!
//! Every call is a request on the shared [`Dispatcher`], so pacing and bans
//! apply to all of them alike.

mod decode;

pub use decode::*;

use thiserror::Error;

use crate::dispatch::{priority, DispatchError, Dispatcher, Method, Outcome, Payload};
use crate::models::{AuthorStub, CatalogPage, Challenge, ChallengeStub, RemoteAuthor};

const AUTHORS_PATH: &str = "auteurs";
const CHALLENGES_PATH: &str = "challenges";

/// Avatar served when an author never uploaded one.
const DEFAULT_AVATAR: &str = "auton0.png";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("expected a JSON body from {0}")]
    MissingBody(String),
}

#[derive(Clone)]
pub struct RootMeClient {
    dispatcher: Dispatcher,
    api_url: String,
    image_url: String,
    lang: String,
}

impl RootMeClient {
    pub fn new(
        dispatcher: Dispatcher,
        api_url: impl Into<String>,
        image_url: impl Into<String>,
        lang: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            api_url: api_url.into(),
            image_url: image_url.into(),
            lang: lang.into(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Fetch the full profile of author `id`.
    pub async fn get_author(&self, id: i64, priority: i32) -> Result<Outcome<RemoteAuthor>, ClientError> {
        // The API answers id 0 with garbage instead of a 404.
        if id == 0 {
            return Ok(Outcome::NotFound);
        }

        let url = format!("{}/{}/{}", self.api_url, AUTHORS_PATH, id);
        match self.get_json(&url, Vec::new(), priority).await? {
            Outcome::Found(body) => Ok(match decode_author(&body, id)? {
                Some(author) => Outcome::Found(author),
                None => Outcome::NotFound,
            }),
            Outcome::Premium => Ok(Outcome::Premium),
            Outcome::NotFound => Ok(Outcome::NotFound),
        }
    }

    /// All authors whose name matches `name`, following pages of 50 hits.
    pub async fn search_authors(&self, name: &str, priority: i32) -> Result<Vec<AuthorStub>, ClientError> {
        let url = format!("{}/{}", self.api_url, AUTHORS_PATH);
        let mut found = Vec::new();
        let mut start = 0;

        loop {
            let params = vec![
                ("nom".to_string(), name.to_string()),
                ("count".to_string(), start.to_string()),
                ("lang".to_string(), self.lang.clone()),
            ];
            let page = match self.get_json(&url, params, priority).await? {
                Outcome::Found(body) => decode_author_search(&body, name)?,
                Outcome::Premium | Outcome::NotFound => Vec::new(),
            };

            let full = page.len() == PAGE_SIZE;
            found.extend(page);
            if !full {
                break;
            }
            start += PAGE_SIZE;
        }

        Ok(found)
    }

    /// One catalog page starting at offset `start`.
    pub async fn catalog_page(&self, start: usize, priority: i32) -> Result<CatalogPage, ClientError> {
        let url = format!("{}/{}", self.api_url, CHALLENGES_PATH);
        let params = vec![("debut_challenges".to_string(), start.to_string())];
        match self.get_json(&url, params, priority).await? {
            Outcome::Found(body) => Ok(decode_catalog_page(&body, start)?),
            Outcome::Premium | Outcome::NotFound => Ok(CatalogPage {
                challenges: Vec::new(),
                has_next: false,
            }),
        }
    }

    /// Walk every catalog page.
    pub async fn fetch_catalog(&self, priority: i32) -> Result<Vec<ChallengeStub>, ClientError> {
        let mut challenges = Vec::new();
        let mut start = 0;

        loop {
            let page = self.catalog_page(start, priority).await?;
            tracing::debug!(start, count = page.challenges.len(), "Fetched catalog page");
            challenges.extend(page.challenges);
            if !page.has_next {
                break;
            }
            start += PAGE_SIZE - start % PAGE_SIZE;
        }

        Ok(challenges)
    }

    /// Fetch the detail of challenge `id`.
    pub async fn get_challenge(&self, id: i64, priority: i32) -> Result<Outcome<Challenge>, ClientError> {
        let url = format!("{}/{}/{}", self.api_url, CHALLENGES_PATH, id);
        match self.get_json(&url, Vec::new(), priority).await? {
            Outcome::Found(body) => Ok(Outcome::Found(decode_challenge(&body, id)?)),
            Outcome::Premium => Ok(Outcome::Premium),
            Outcome::NotFound => Ok(Outcome::NotFound),
        }
    }

    /// URL of the avatar of author `id`, or the platform default.
    pub async fn avatar_url(&self, id: i64) -> Result<String, ClientError> {
        for extension in ["png", "jpg"] {
            let url = format!("{}/auton{}.{}", self.image_url, id, extension);
            let probe = self
                .dispatcher
                .enqueue(url.as_str(), Vec::new(), Method::Head, priority::CATALOG)
                .await?;
            if matches!(probe, Outcome::Found(_)) {
                return Ok(url);
            }
        }
        Ok(format!("{}/{}", self.image_url, DEFAULT_AVATAR))
    }

    async fn get_json(
        &self,
        url: &str,
        params: Vec<(String, String)>,
        priority: i32,
    ) -> Result<Outcome<serde_json::Value>, ClientError> {
        let outcome = self.dispatcher.enqueue(url, params, Method::Get, priority).await?;
        match outcome {
            Outcome::Found(Payload::Json(body)) => Ok(Outcome::Found(body)),
            Outcome::Found(Payload::Present) => Err(ClientError::MissingBody(url.to_string())),
            Outcome::Premium => Ok(Outcome::Premium),
            Outcome::NotFound => Ok(Outcome::NotFound),
        }
    }
}
