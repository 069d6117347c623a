//! Integration tests against an in-process mock of the Root-Me API.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method as HttpMethod, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use reqwest::Client;
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tokio::time::Instant;

use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::dispatch::{
    priority, BanReason, BanStatus, DispatchConfig, DispatchError, Dispatcher, Method, Outcome,
    Payload,
};
use crate::models::{Challenge, KnownChallenge, NewSolveEvent, RankGap};
use crate::rootme::RootMeClient;
use crate::sync::{NotificationSink, SyncEngine};
use crate::{create_router, AppState};

const ROOTME_KEY: &str = "rootme-test-key";
const TEST_PSK: &str = "test-api-key";

// ==================== MOCK ROOT-ME ====================

#[derive(Debug, Clone)]
struct Hit {
    method: HttpMethod,
    path: String,
    query: HashMap<String, String>,
    cookie: Option<String>,
    at: Instant,
}

/// Forced answer for the next request on a path.
enum Scripted {
    Status(u16),
    Stall(Duration),
}

struct MockChallenge {
    listed: bool,
    premium: bool,
    validations: i64,
}

struct MockAuthor {
    name: String,
    score: i64,
    solves: Vec<i64>,
}

#[derive(Default)]
struct MockData {
    hits: Vec<Hit>,
    scripts: HashMap<String, VecDeque<Scripted>>,
    challenges: BTreeMap<i64, MockChallenge>,
    authors: BTreeMap<i64, MockAuthor>,
    avatars: HashSet<String>,
}

#[derive(Clone)]
struct MockRootMe {
    url: String,
    data: Arc<Mutex<MockData>>,
}

impl MockRootMe {
    async fn start() -> Self {
        let data = Arc::new(Mutex::new(MockData::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock");
        let url = format!("http://{}", listener.local_addr().expect("Failed to get addr"));

        let mock = Self { url, data };
        let app = Router::new().fallback(serve_mock).with_state(mock.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        mock
    }

    fn add_challenge(&self, id: i64, validations: i64) {
        self.data.lock().unwrap().challenges.insert(
            id,
            MockChallenge {
                listed: true,
                premium: false,
                validations,
            },
        );
    }

    fn add_premium(&self, id: i64) {
        self.data.lock().unwrap().challenges.insert(
            id,
            MockChallenge {
                listed: true,
                premium: true,
                validations: 0,
            },
        );
    }

    /// Challenge reachable by id but missing from the catalog listing.
    fn add_unlisted_challenge(&self, id: i64, validations: i64) {
        self.data.lock().unwrap().challenges.insert(
            id,
            MockChallenge {
                listed: false,
                premium: false,
                validations,
            },
        );
    }

    fn set_author(&self, id: i64, name: &str, score: i64, solves: &[i64]) {
        self.data.lock().unwrap().authors.insert(
            id,
            MockAuthor {
                name: name.to_string(),
                score,
                solves: solves.to_vec(),
            },
        );
    }

    fn add_avatar(&self, file: &str) {
        self.data.lock().unwrap().avatars.insert(file.to_string());
    }

    fn script(&self, path: &str, answers: Vec<Scripted>) {
        self.data
            .lock()
            .unwrap()
            .scripts
            .insert(path.to_string(), answers.into());
    }

    fn hits(&self) -> Vec<Hit> {
        self.data.lock().unwrap().hits.clone()
    }

    fn hits_for(&self, path: &str) -> Vec<Hit> {
        self.hits().into_iter().filter(|hit| hit.path == path).collect()
    }

    fn api_url(&self) -> String {
        self.url.clone()
    }

    fn image_url(&self) -> String {
        format!("{}/IMG", self.url)
    }
}

async fn serve_mock(
    State(mock): State<MockRootMe>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let path = uri.path().to_string();
    let scripted = {
        let mut data = mock.data.lock().unwrap();
        data.hits.push(Hit {
            method,
            path: path.clone(),
            query: query.clone(),
            cookie: headers
                .get(header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string()),
            at: Instant::now(),
        });
        data.scripts.get_mut(&path).and_then(|answers| answers.pop_front())
    };

    match scripted {
        Some(Scripted::Status(code)) => return StatusCode::from_u16(code).unwrap().into_response(),
        Some(Scripted::Stall(delay)) => tokio::time::sleep(delay).await,
        None => {}
    }

    let response = {
        let data = mock.data.lock().unwrap();
        data.respond(&path, &query)
    };
    response
}

impl MockData {
    fn respond(&self, path: &str, query: &HashMap<String, String>) -> Response {
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match segments.as_slice() {
            ["challenges"] => {
                let start = offset(query, "debut_challenges");
                Json(self.catalog_page(start)).into_response()
            }
            ["challenges", id] => match id.parse::<i64>().ok().and_then(|id| self.challenges.get(&id).map(|c| (id, c))) {
                Some((_, challenge)) if challenge.premium => StatusCode::UNAUTHORIZED.into_response(),
                Some((id, challenge)) => Json(challenge_json(id, challenge)).into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            },
            ["auteurs"] => {
                let name = query.get("nom").cloned().unwrap_or_default();
                Json(self.author_search(&name, offset(query, "count"))).into_response()
            }
            ["auteurs", id] => match id.parse::<i64>().ok().and_then(|id| self.authors.get(&id).map(|a| (id, a))) {
                Some((id, author)) => Json(author_json(id, author)).into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            },
            ["IMG", file] if self.avatars.contains(*file) => StatusCode::OK.into_response(),
            ["probe", "garbage"] => "<html>maintenance</html>".into_response(),
            ["probe", ..] => Json(json!({ "path": path })).into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    fn catalog_page(&self, start: usize) -> Value {
        let listed: Vec<i64> = self
            .challenges
            .iter()
            .filter(|(_, challenge)| challenge.listed)
            .map(|(id, _)| *id)
            .collect();

        let mut entries = Map::new();
        for (position, id) in listed.iter().skip(start).take(50).enumerate() {
            entries.insert(
                position.to_string(),
                json!({ "id_challenge": id.to_string(), "titre": format!("Challenge {}", id) }),
            );
        }

        let mut page = vec![Value::Object(entries)];
        if start + 50 < listed.len() {
            page.push(json!({ "rel": "next", "href": format!("/challenges?debut_challenges={}", start + 50) }));
        }
        Value::Array(page)
    }

    fn author_search(&self, name: &str, start: usize) -> Value {
        let mut entries = Map::new();
        let matches = self
            .authors
            .iter()
            .filter(|(_, author)| author.name.contains(name))
            .skip(start)
            .take(50);
        for (position, (id, author)) in matches.enumerate() {
            entries.insert(
                position.to_string(),
                json!({ "id_auteur": id.to_string(), "nom": author.name }),
            );
        }
        json!([entries])
    }
}

fn offset(query: &HashMap<String, String>, key: &str) -> usize {
    query.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn challenge_json(id: i64, challenge: &MockChallenge) -> Value {
    let mut detail = json!({
        "titre": format!("Challenge {}", id),
        "rubrique": if id % 2 == 0 { "Web - Serveur" } else { "Cryptanalyse" },
        "soustitre": "Find the flag",
        "score": "20",
        "difficulte": "Facile",
        "date_publication": "2024-03-01 12:00:00",
    });
    if challenge.validations > 0 {
        detail["validations"] = json!(challenge.validations.to_string());
    }
    json!([detail])
}

fn author_json(id: i64, author: &MockAuthor) -> Value {
    let validations: Vec<Value> = author
        .solves
        .iter()
        .map(|challenge| {
            json!({
                "id_challenge": challenge.to_string(),
                "titre": format!("Challenge {}", challenge),
                "date": "2024-05-04 08:30:00",
            })
        })
        .collect();
    json!({
        "id_auteur": id.to_string(),
        "nom": author.name,
        "score": author.score.to_string(),
        "position": if author.score > 0 { json!("42") } else { json!("") },
        "validations": validations,
    })
}

// ==================== HARNESS ====================

#[derive(Default)]
struct RecordingSink {
    challenges: Mutex<Vec<Challenge>>,
    solves: Mutex<Vec<NewSolveEvent>>,
}

impl NotificationSink for RecordingSink {
    fn notify_new_challenge(&self, challenge: &Challenge) {
        self.challenges.lock().unwrap().push(challenge.clone());
    }

    fn notify_new_solve(&self, event: &NewSolveEvent) {
        self.solves.lock().unwrap().push(event.clone());
    }
}

fn fast_dispatch() -> DispatchConfig {
    DispatchConfig {
        api_key: Some(ROOTME_KEY.to_string()),
        pacing: Duration::from_millis(10),
        rate_limit_ban: Duration::from_millis(300),
        forbidden_ban: Duration::from_millis(500),
        transient_backoff: Duration::from_millis(50),
        request_timeout: Duration::from_millis(300),
        max_attempts: None,
    }
}

struct Harness {
    mock: MockRootMe,
    repo: Arc<Repository>,
    dispatcher: Dispatcher,
    engine: SyncEngine,
    sink: Arc<RecordingSink>,
    _temp_dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        Self::with_dispatch(fast_dispatch()).await
    }

    async fn with_dispatch(config: DispatchConfig) -> Self {
        Self::build(config, 3).await
    }

    async fn with_first_blood_threshold(threshold: i64) -> Self {
        Self::build(fast_dispatch(), threshold).await
    }

    async fn build(config: DispatchConfig, first_blood_threshold: i64) -> Self {
        let mock = MockRootMe::start().await;
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        let dispatcher = Dispatcher::spawn(config, reqwest::Client::new());
        let client = RootMeClient::new(dispatcher.clone(), mock.api_url(), mock.image_url(), "fr");
        let sink = Arc::new(RecordingSink::default());
        let engine = SyncEngine::new(client, repo.clone(), sink.clone(), first_blood_threshold);

        Harness {
            mock,
            repo,
            dispatcher,
            engine,
            sink,
            _temp_dir: temp_dir,
        }
    }

    fn probe(&self, name: &str, priority: i32) -> crate::dispatch::PendingRequest {
        self.dispatcher.enqueue(
            format!("{}/probe/{}", self.mock.url, name),
            Vec::new(),
            Method::Get,
            priority,
        )
    }

    async fn track(&self, id: i64) {
        self.engine
            .add_user(id)
            .await
            .expect("add_user failed")
            .expect("author should exist");
    }
}

// ==================== DISPATCH TESTS ====================

#[tokio::test]
async fn test_priority_then_fifo_order() {
    let h = Harness::new().await;

    // Enqueued before the worker gets a chance to run.
    let pending: Vec<_> = [5, 1, 5, 0]
        .iter()
        .enumerate()
        .map(|(i, priority)| h.probe(&i.to_string(), *priority))
        .collect();
    for request in pending {
        assert!(matches!(request.await, Ok(Outcome::Found(Payload::Json(_)))));
    }

    let order: Vec<String> = h.mock.hits().into_iter().map(|hit| hit.path).collect();
    assert_eq!(order, vec!["/probe/3", "/probe/1", "/probe/0", "/probe/2"]);
}

#[tokio::test]
async fn test_requests_are_paced() {
    let h = Harness::with_dispatch(DispatchConfig {
        pacing: Duration::from_millis(100),
        ..fast_dispatch()
    })
    .await;

    let first = h.probe("a", priority::CATALOG);
    let second = h.probe("b", priority::CATALOG);
    let third = h.probe("c", priority::CATALOG);
    first.await.unwrap();
    second.await.unwrap();
    third.await.unwrap();

    let hits = h.mock.hits();
    assert_eq!(hits.len(), 3);
    for pair in hits.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(95));
    }
}

#[tokio::test]
async fn test_credentials_and_cache_buster_are_sent() {
    let h = Harness::new().await;
    h.probe("creds", priority::INTERACTIVE).await.unwrap();

    let hit = &h.mock.hits_for("/probe/creds")[0];
    assert_eq!(hit.cookie.as_deref(), Some("api_key=rootme-test-key"));
    assert!(hit.query.iter().any(|(key, value)| key == value && key.parse::<i64>().is_ok()));
}

#[tokio::test]
async fn test_rate_limit_bans_every_request() {
    let h = Harness::new().await;
    h.mock.script("/probe/limited", vec![Scripted::Status(429)]);

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let mut observer = h.dispatcher.subscribe_ban();
    let seen = transitions.clone();
    tokio::spawn(async move {
        while observer.changed().await.is_ok() {
            let status = observer.borrow_and_update().clone();
            seen.lock().unwrap().push(status);
        }
    });

    let limited = h.probe("limited", priority::INTERACTIVE);
    let other = h.probe("other", priority::CATALOG);
    assert!(matches!(limited.await, Ok(Outcome::Found(_))));
    assert!(matches!(other.await, Ok(Outcome::Found(_))));

    let hits = h.mock.hits();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].path, "/probe/limited");
    // The retried request keeps its priority and nothing slips through the ban.
    assert_eq!(hits[1].path, "/probe/limited");
    assert_eq!(hits[2].path, "/probe/other");
    assert!(hits[1].at - hits[0].at >= Duration::from_millis(290));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let transitions = transitions.lock().unwrap().clone();
    assert!(matches!(
        transitions.first(),
        Some(BanStatus::Banned {
            reason: BanReason::RateLimited,
            ..
        })
    ));
    assert_eq!(transitions.last(), Some(&BanStatus::Clear));
    assert_eq!(h.dispatcher.ban_status(), BanStatus::Clear);
}

#[tokio::test]
async fn test_forbidden_uses_longer_window() {
    let h = Harness::new().await;
    h.mock.script("/probe/forbidden", vec![Scripted::Status(403)]);

    let request = tokio::spawn(h.probe("forbidden", priority::INTERACTIVE));

    let started = Instant::now();
    loop {
        if let BanStatus::Banned { reason, .. } = h.dispatcher.ban_status() {
            assert_eq!(reason, BanReason::Forbidden);
            break;
        }
        assert!(started.elapsed() < Duration::from_secs(2), "ban never published");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Queued during the ban, behind the retried request.
    let other = h.probe("other", priority::CATALOG);

    assert!(matches!(request.await.unwrap(), Ok(Outcome::Found(_))));
    assert!(matches!(other.await, Ok(Outcome::Found(_))));

    let hits = h.mock.hits();
    let paths: Vec<&str> = hits.iter().map(|hit| hit.path.as_str()).collect();
    assert_eq!(paths, ["/probe/forbidden", "/probe/forbidden", "/probe/other"]);
    assert!(hits[1].at - hits[0].at >= Duration::from_millis(490));
    assert!(hits[2].at - hits[0].at >= Duration::from_millis(490));
}

#[tokio::test]
async fn test_pacing_resumes_after_ban() {
    let h = Harness::with_dispatch(DispatchConfig {
        pacing: Duration::from_millis(200),
        ..fast_dispatch()
    })
    .await;
    h.mock.script("/probe/limited", vec![Scripted::Status(429)]);

    assert!(matches!(
        h.probe("limited", priority::INTERACTIVE).await,
        Ok(Outcome::Found(_))
    ));

    let hits = h.mock.hits_for("/probe/limited");
    assert_eq!(hits.len(), 2);
    // 300ms ban, then a full pacing interval.
    assert!(hits[1].at - hits[0].at >= Duration::from_millis(490));
}

#[tokio::test]
async fn test_not_found_and_premium_are_terminal() {
    let h = Harness::new().await;
    h.mock.add_premium(5);

    let missing = h
        .engine
        .client()
        .get_challenge(404, priority::INTERACTIVE)
        .await
        .unwrap();
    assert_eq!(missing, Outcome::NotFound);

    let premium = h
        .engine
        .client()
        .get_challenge(5, priority::INTERACTIVE)
        .await
        .unwrap();
    assert_eq!(premium, Outcome::Premium);

    assert_eq!(h.mock.hits().len(), 2);
    assert_eq!(h.dispatcher.ban_status(), BanStatus::Clear);
}

#[tokio::test]
async fn test_timeout_is_retried() {
    let h = Harness::new().await;
    h.mock
        .script("/probe/slow", vec![Scripted::Stall(Duration::from_secs(1))]);

    let result = h.probe("slow", priority::INTERACTIVE).await;
    assert!(matches!(result, Ok(Outcome::Found(_))));
    assert_eq!(h.mock.hits_for("/probe/slow").len(), 2);
}

#[tokio::test]
async fn test_server_errors_exhaust_retry_budget() {
    let h = Harness::with_dispatch(DispatchConfig {
        max_attempts: Some(3),
        ..fast_dispatch()
    })
    .await;
    h.mock.script(
        "/probe/down",
        vec![
            Scripted::Status(503),
            Scripted::Status(502),
            Scripted::Status(500),
        ],
    );
    h.mock.script("/probe/flaky", vec![Scripted::Status(500)]);

    match h.probe("down", priority::INTERACTIVE).await {
        Err(DispatchError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(h.mock.hits_for("/probe/down").len(), 3);

    assert!(matches!(
        h.probe("flaky", priority::INTERACTIVE).await,
        Ok(Outcome::Found(_))
    ));
    assert_eq!(h.dispatcher.pending(), 0);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let h = Harness::new().await;
    h.mock.script("/probe/teapot", vec![Scripted::Status(418)]);

    match h.probe("teapot", priority::INTERACTIVE).await {
        Err(DispatchError::UnexpectedStatus { status, .. }) => assert_eq!(status, 418),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(
        h.probe("garbage", priority::INTERACTIVE).await,
        Err(DispatchError::Body { .. })
    ));
    assert_eq!(h.mock.hits().len(), 2);
}

#[tokio::test]
async fn test_dropped_request_is_never_sent() {
    let h = Harness::new().await;

    let kept = h.probe("kept", priority::INTERACTIVE);
    drop(h.probe("dropped", priority::CATALOG));
    kept.await.unwrap();

    // Anything still queued is popped and skipped within a pacing interval.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.mock.hits_for("/probe/dropped").is_empty());
    assert_eq!(h.dispatcher.pending(), 0);
}

// ==================== CLIENT TESTS ====================

#[tokio::test]
async fn test_search_follows_full_pages() {
    let h = Harness::new().await;
    for id in 1..=60 {
        h.mock.set_author(id, &format!("user{}", id), 10, &[]);
    }

    let found = h
        .engine
        .client()
        .search_authors("user", priority::INTERACTIVE)
        .await
        .unwrap();
    assert_eq!(found.len(), 60);

    let counts: Vec<String> = h
        .mock
        .hits_for("/auteurs")
        .iter()
        .map(|hit| hit.query["count"].clone())
        .collect();
    assert_eq!(counts, vec!["0", "50"]);
}

#[tokio::test]
async fn test_search_user_without_match() {
    let h = Harness::new().await;
    h.mock.set_author(10, "alice", 100, &[]);
    h.mock.set_author(13, "alicia", 50, &[]);
    h.mock.set_author(11, "bob", 300, &[]);

    assert!(h.engine.search_user("zed").await.unwrap().is_empty());

    let found = h.engine.search_user("ali").await.unwrap();
    let ids: Vec<i64> = found.iter().map(|author| author.id).collect();
    assert_eq!(ids, vec![10, 13]);
    assert_eq!(found[0].score, 100);
}

#[tokio::test]
async fn test_avatar_probes_extensions() {
    let h = Harness::new().await;
    h.mock.add_avatar("auton10.jpg");

    let url = h.engine.client().avatar_url(10).await.unwrap();
    assert_eq!(url, format!("{}/auton10.jpg", h.mock.image_url()));

    let fallback = h.engine.client().avatar_url(11).await.unwrap();
    assert_eq!(fallback, format!("{}/auton0.png", h.mock.image_url()));

    let png = h.mock.hits_for("/IMG/auton10.png");
    assert_eq!(png.len(), 1);
    assert_eq!(png[0].method, HttpMethod::HEAD);
}

// ==================== SYNC TESTS ====================

#[tokio::test]
async fn test_catalog_sync_announces_only_new_challenges() {
    let h = Harness::new().await;
    for id in 1..=3 {
        h.mock.add_challenge(id, 1);
    }

    // First run imports silently.
    let imported = h.engine.sync_catalog().await.unwrap();
    assert_eq!(imported.len(), 3);
    assert!(h.sink.challenges.lock().unwrap().is_empty());

    h.mock.add_challenge(4, 0);
    let events = h.engine.sync_catalog().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].challenge.id, 4);
    assert_eq!(events[0].challenge.title, "Challenge 4");

    let announced = h.sink.challenges.lock().unwrap().clone();
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].id, 4);

    for id in 1..=3 {
        assert_eq!(h.mock.hits_for(&format!("/challenges/{}", id)).len(), 1);
    }
    assert!(h.engine.sync_catalog().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_premium_challenge_is_recorded_once() {
    let h = Harness::new().await;
    h.mock.add_challenge(1, 0);
    h.mock.add_premium(2);

    let events = h.engine.sync_catalog().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        h.repo.get_challenge(2).await.unwrap(),
        Some(KnownChallenge::Premium { id: 2 })
    );

    h.engine.sync_catalog().await.unwrap();
    assert_eq!(h.mock.hits_for("/challenges/2").len(), 1);
}

#[tokio::test]
async fn test_catalog_pagination() {
    let h = Harness::new().await;
    for id in 1..=120 {
        h.mock.add_challenge(id, 0);
    }

    let events = h.engine.sync_catalog().await.unwrap();
    assert_eq!(events.len(), 120);
    assert_eq!(h.repo.count_challenges().await.unwrap(), 120);

    let starts: Vec<String> = h
        .mock
        .hits_for("/challenges")
        .iter()
        .map(|hit| hit.query["debut_challenges"].clone())
        .collect();
    assert_eq!(starts, vec!["0", "50", "100"]);
}

#[tokio::test]
async fn test_author_sync_first_blood_and_rank_gap() {
    let h = Harness::new().await;
    h.mock.add_challenge(1, 100);
    h.mock.add_challenge(2, 4);
    h.mock.add_challenge(3, 500);
    h.mock.set_author(10, "alice", 100, &[]);
    h.mock.set_author(11, "bob", 300, &[1, 2]);
    h.mock.set_author(12, "carol", 200, &[1]);
    h.mock.set_author(13, "dave", 50, &[1]);

    h.engine.sync_catalog().await.unwrap();
    for id in [10, 11, 12, 13] {
        h.track(id).await;
    }

    h.mock.set_author(10, "alice", 170, &[1, 2, 3]);
    let events = h.engine.sync_author(10).await.unwrap();
    let ids: Vec<i64> = events.iter().map(|event| event.challenge.id).collect();
    assert_eq!(ids, [1, 2, 3]);

    // Fourth tracked solver of challenge 1.
    assert!(!events[0].is_first_blood);
    // Second tracked solver of challenge 2.
    assert!(events[1].is_first_blood);
    // First tracked solver, however many solved it upstream.
    assert!(events[2].is_first_blood);
    assert_eq!(events[2].challenge.solver_count, 500);
    assert_eq!(events[0].author.score, 170);
    assert_eq!(
        events[0].rank_gap_to_next,
        Some(RankGap {
            username: "carol".to_string(),
            score: 200,
            points_behind: 30,
        })
    );
    assert_eq!(h.sink.solves.lock().unwrap().len(), 3);

    // Nothing changed upstream: nothing to report.
    assert!(h.engine.sync_author(10).await.unwrap().is_empty());
    assert_eq!(h.sink.solves.lock().unwrap().len(), 3);

    // Nobody scores more than bob.
    h.mock.set_author(11, "bob", 330, &[1, 2, 3]);
    let events = h.engine.sync_author(11).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].challenge.id, 3);
    assert!(events[0].is_first_blood);
    assert_eq!(events[0].rank_gap_to_next, None);

    // Local solves never change the upstream solver count.
    let Some(KnownChallenge::Available(stored)) = h.repo.get_challenge(3).await.unwrap() else {
        panic!("challenge 3 should be readable");
    };
    assert_eq!(stored.solver_count, 500);
}

#[tokio::test]
async fn test_concurrent_solves_share_one_first_blood() {
    let h = Harness::with_first_blood_threshold(1).await;
    h.mock.add_challenge(1, 0);
    h.mock.set_author(10, "alice", 0, &[]);
    h.mock.set_author(11, "bob", 0, &[]);

    h.engine.sync_catalog().await.unwrap();
    h.track(10).await;
    h.track(11).await;

    h.mock.set_author(10, "alice", 20, &[1]);
    h.mock.set_author(11, "bob", 20, &[1]);
    let (alice, bob) = tokio::join!(h.engine.sync_author(10), h.engine.sync_author(11));

    let events: Vec<NewSolveEvent> = alice.unwrap().into_iter().chain(bob.unwrap()).collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events.iter().filter(|event| event.is_first_blood).count(), 1);
}

#[tokio::test]
async fn test_unknown_author_sync_is_noop() {
    let h = Harness::new().await;
    h.mock.set_author(999, "ghost", 10, &[]);

    assert!(h.engine.sync_author(999).await.unwrap().is_empty());
    assert!(h.mock.hits_for("/auteurs/999").is_empty());
}

#[tokio::test]
async fn test_author_sync_backfills_unknown_challenges() {
    let h = Harness::new().await;
    h.mock.add_challenge(1, 3);
    h.mock.add_unlisted_challenge(7, 1);
    h.mock.set_author(10, "alice", 100, &[1]);

    h.engine.sync_catalog().await.unwrap();
    h.track(10).await;

    // Challenge 8 does not exist upstream and is skipped.
    h.mock.set_author(10, "alice", 150, &[1, 7, 8]);
    let events = h.engine.sync_author(10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].challenge.id, 7);
    assert!(events[0].is_first_blood);
    // Already counts alice upstream; not counted twice.
    assert_eq!(events[0].challenge.solver_count, 1);

    assert_eq!(h.mock.hits_for("/challenges/7").len(), 1);
    assert!(h.repo.has_challenge(7).await.unwrap());
    let solved = h.repo.solved_challenge_ids(10).await.unwrap();
    assert_eq!(solved, HashSet::from([1, 7]));
}

#[tokio::test]
async fn test_premium_solves_are_stored_silently() {
    let h = Harness::new().await;
    h.mock.add_challenge(1, 0);
    h.mock.add_premium(2);
    h.mock.set_author(10, "alice", 100, &[1]);

    h.engine.sync_catalog().await.unwrap();
    h.track(10).await;

    h.mock.set_author(10, "alice", 140, &[1, 2]);
    assert!(h.engine.sync_author(10).await.unwrap().is_empty());
    assert!(h.repo.solved_challenge_ids(10).await.unwrap().contains(&2));
    assert_eq!(h.repo.get_author(10).await.unwrap().unwrap().score, 140);
}

#[tokio::test]
async fn test_update_users_and_remove_user() {
    let h = Harness::new().await;
    h.mock.add_challenge(1, 0);
    h.mock.add_challenge(2, 0);
    h.mock.set_author(10, "alice", 0, &[]);
    h.mock.set_author(11, "bob", 0, &[]);

    h.engine.sync_catalog().await.unwrap();
    h.track(10).await;
    h.track(11).await;

    h.mock.set_author(10, "alice", 20, &[1]);
    h.mock.set_author(11, "bob", 40, &[1, 2]);
    let events = h.engine.update_users().await.unwrap();
    assert_eq!(events.len(), 3);

    let removed = h.engine.remove_user(11).await.unwrap().unwrap();
    assert_eq!(removed.username, "bob");
    assert!(h.engine.remove_user(11).await.unwrap().is_none());
    assert!(h.repo.solved_challenge_ids(11).await.unwrap().is_empty());
    assert!(h.engine.sync_author(11).await.unwrap().is_empty());
}

// ==================== API TESTS ====================

struct ApiFixture {
    client: Client,
    base_url: String,
    harness: Harness,
}

impl ApiFixture {
    async fn new() -> Self {
        let harness = Harness::new().await;

        let config = Config {
            api_key: None,
            api_url: harness.mock.api_url(),
            image_url: harness.mock.image_url(),
            lang: "fr".to_string(),
            db_path: harness._temp_dir.path().join("test.sqlite"),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            api_psk: Some(TEST_PSK.to_string()),
            log_level: "warn".to_string(),
            log_json: false,
            pacing: Duration::from_millis(10),
            request_timeout: Duration::from_millis(300),
            max_attempts: None,
            sync_interval: Duration::from_secs(3600),
            first_blood_threshold: 3,
        };

        let state = AppState {
            repo: harness.repo.clone(),
            engine: harness.engine.clone(),
            config: Arc::new(config),
        };
        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let base_url = format!("http://{}", listener.local_addr().expect("Failed to get addr"));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-api-key", TEST_PSK.parse().unwrap());
        let client = Client::builder().default_headers(headers).build().unwrap();

        ApiFixture {
            client,
            base_url,
            harness,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        read(response).await
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        read(response).await
    }

    async fn put(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.put(self.url(path)).send().await.unwrap();
        read(response).await
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.delete(self.url(path)).send().await.unwrap();
        read(response).await
    }
}

async fn read(response: reqwest::Response) -> (StatusCode, Value) {
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_health_check() {
    let fixture = ApiFixture::new().await;
    let response = Client::new()
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_api_requires_psk() {
    let fixture = ApiFixture::new().await;
    let anonymous = Client::new();

    let response = anonymous.get(fixture.url("/api/status")).send().await.unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let response = anonymous
        .get(fixture.url("/api/status"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = anonymous
        .get(fixture.url("/api/status"))
        .bearer_auth(TEST_PSK)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_status_reports_dispatcher_state() {
    let fixture = ApiFixture::new().await;

    let (status, body) = fixture.get("/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["ban"]["state"], "clear");
    assert_eq!(body["data"]["pendingRequests"], 0);
    assert_eq!(body["data"]["trackedAuthors"], 0);

    fixture.harness.mock.set_author(10, "alice", 100, &[]);
    fixture.harness.track(10).await;
    let (_, body) = fixture.get("/api/status").await;
    assert_eq!(body["data"]["trackedAuthors"], 1);
}

#[tokio::test]
async fn test_add_author_joins_global_scoreboard() {
    let fixture = ApiFixture::new().await;
    fixture.harness.mock.set_author(10, "alice", 100, &[]);

    let (status, body) = fixture.post("/api/authors", json!({ "id": 10 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "alice");

    let (_, body) = fixture.get("/api/scoreboards/global").await;
    assert_eq!(body["data"]["members"][0]["id"], 10);

    let (status, body) = fixture.post("/api/authors", json!({ "id": 404 })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, body) = fixture.get("/api/authors/10/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalSolves"], 0);

    let (status, _) = fixture.delete("/api/authors/10").await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = fixture.get("/api/scoreboards/global").await;
    assert_eq!(body["data"]["members"], json!([]));
}

#[tokio::test]
async fn test_scoreboard_lifecycle() {
    let fixture = ApiFixture::new().await;
    fixture.harness.mock.set_author(10, "alice", 100, &[]);
    fixture.post("/api/authors", json!({ "id": 10 })).await;

    let (status, body) = fixture.post("/api/scoreboards", json!({ "name": "friends" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["members"], json!([]));

    let (status, _) = fixture.post("/api/scoreboards", json!({ "name": "friends" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = fixture.put("/api/scoreboards/friends/members/10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["members"][0]["username"], "alice");

    let (status, _) = fixture.put("/api/scoreboards/friends/members/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = fixture.delete("/api/scoreboards/friends/members/10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["members"], json!([]));

    let (status, body) = fixture.delete("/api/scoreboards/global").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = fixture.delete("/api/scoreboards/friends").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = fixture.get("/api/scoreboards/friends").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = fixture.get("/api/scoreboards").await;
    assert_eq!(body["data"], json!(["global"]));
}

#[tokio::test]
async fn test_catalog_endpoints() {
    let fixture = ApiFixture::new().await;
    fixture.harness.mock.add_challenge(1, 0);
    fixture.harness.mock.add_premium(2);
    fixture.harness.mock.add_challenge(4, 0);

    let (status, body) = fixture.post("/api/sync/catalog", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = fixture.get("/api/challenges?q=Challenge%204").await;
    assert_eq!(body["data"][0]["id"], 4);

    let (_, body) = fixture.get("/api/challenges/2").await;
    assert_eq!(body["data"]["kind"], "premium");

    let (_, body) = fixture.get("/api/challenges/1").await;
    assert_eq!(body["data"]["kind"], "available");
    assert_eq!(body["data"]["category"], "Cryptanalyse");

    let (status, _) = fixture.get("/api/challenges/77").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = fixture.get("/api/stats").await;
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["categories"]["Web - Serveur"], 1);
}
