//! Search backends against local stand-ins of the remote services.
//!
//! Each test serves the handful of endpoints a backend calls from an axum
//! router on a loopback port and points the backend at it.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use twitter_search::TwitterSearchError;
use twitter_search::backend::{ApiBackend, ScraperBackend, SearchBackend};
use twitter_search::config::{DEFAULT_SCRAPER_ACTOR, ScraperConfig, SearchConfig, TwitterConfig};

const QUERY: &str = "(https://www.youtube.com/watch?v=v1) -spam";
const ISSUED_TOKEN: &str = "issued-token";
const APIFY_TOKEN: &str = "apify-token";

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

// =============================================================================
// Search API
// =============================================================================

#[derive(Default)]
struct ApiState {
    token_requests: AtomicUsize,
    rate_limits: AtomicUsize,
    max_ids: Mutex<Vec<Option<String>>>,
}

fn status(id: u64, author: &str) -> Value {
    json!({"id_str": id.to_string(), "user": {"screen_name": author}, "text": "link"})
}

async fn issue_token(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    let authorization = headers.get("authorization").and_then(|v| v.to_str().ok());
    // key:secret
    let expected = Some("Basic a2V5OnNlY3JldA==");
    if authorization != expected || body != "grant_type=client_credentials" {
        return (StatusCode::FORBIDDEN, "unable to verify credentials").into_response();
    }
    Json(json!({"token_type": "bearer", "access_token": ISSUED_TOKEN})).into_response()
}

async fn search_tweets(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if bearer(&headers) != Some(ISSUED_TOKEN) {
        return (StatusCode::UNAUTHORIZED, "invalid or expired token").into_response();
    }
    let max_id = params.get("max_id").cloned();
    state.max_ids.lock().unwrap().push(max_id.clone());
    if params.get("q").map(String::as_str) != Some(QUERY) {
        return (StatusCode::BAD_REQUEST, "unexpected query").into_response();
    }

    if state.rate_limits.load(Ordering::SeqCst) > 0 {
        state.rate_limits.fetch_sub(1, Ordering::SeqCst);
        let reset = (chrono::Utc::now().timestamp() - 5).to_string();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("x-rate-limit-reset", reset)],
            "rate limit exceeded",
        )
            .into_response();
    }

    let statuses = match max_id.as_deref() {
        None => vec![status(300, "alice"), status(200, "bob")],
        Some("199") => vec![status(150, "alice")],
        Some(_) => Vec::new(),
    };
    Json(json!({"statuses": statuses, "search_metadata": {"count": 100}})).into_response()
}

async fn api_backend(
    state: &Arc<ApiState>,
    twitter: TwitterConfig,
    max_pages: u32,
) -> ApiBackend {
    let app = Router::new()
        .route("/oauth2/token", post(issue_token))
        .route("/1.1/search/tweets.json", get(search_tweets))
        .with_state(Arc::clone(state));
    let search = SearchConfig {
        max_pages,
        ..SearchConfig::default()
    };
    ApiBackend::new(&twitter, &search).with_base_url(serve(app).await)
}

fn consumer_credentials() -> TwitterConfig {
    TwitterConfig {
        consumer_key: "key".to_string(),
        consumer_secret: "secret".to_string(),
        bearer_token: None,
    }
}

fn ids(tweets: &[twitter_search::FoundTweet]) -> Vec<&str> {
    tweets.iter().map(|t| t.id_str.as_str()).collect()
}

#[tokio::test]
async fn api_pages_backwards_until_an_empty_page() {
    let state = Arc::new(ApiState::default());
    let backend = api_backend(&state, consumer_credentials(), 0).await;

    let tweets = backend.search(QUERY).await.unwrap();

    assert_eq!(ids(&tweets), vec!["300", "200", "150"]);
    assert_eq!(tweets[1].screen_name.as_deref(), Some("bob"));
    assert_eq!(
        *state.max_ids.lock().unwrap(),
        vec![None, Some("199".to_string()), Some("149".to_string())]
    );

    // The exchanged token is reused for later queries.
    backend.search(QUERY).await.unwrap();
    assert_eq!(state.token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn api_stops_at_the_page_limit() {
    let state = Arc::new(ApiState::default());
    let backend = api_backend(&state, consumer_credentials(), 2).await;

    let tweets = backend.search(QUERY).await.unwrap();

    assert_eq!(ids(&tweets), vec!["300", "200", "150"]);
    assert_eq!(state.max_ids.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn api_waits_out_a_rate_limit_and_repeats_the_page() {
    let state = Arc::new(ApiState::default());
    state.rate_limits.store(1, Ordering::SeqCst);
    let backend = api_backend(&state, consumer_credentials(), 0).await;

    let tweets = backend.search(QUERY).await.unwrap();

    assert_eq!(tweets.len(), 3);
    assert_eq!(
        *state.max_ids.lock().unwrap(),
        vec![
            None,
            None,
            Some("199".to_string()),
            Some("149".to_string())
        ]
    );
}

#[tokio::test]
async fn api_rejected_credentials_are_auth_errors() {
    let state = Arc::new(ApiState::default());
    let wrong_secret = TwitterConfig {
        consumer_secret: "wrong".to_string(),
        ..consumer_credentials()
    };
    let backend = api_backend(&state, wrong_secret, 0).await;
    let err = backend.search(QUERY).await.unwrap_err();
    assert!(matches!(err, TwitterSearchError::Auth { .. }), "{err:?}");

    let stale_token = TwitterConfig {
        bearer_token: Some("stale".to_string()),
        ..consumer_credentials()
    };
    let backend = api_backend(&state, stale_token, 0).await;
    let err = backend.search(QUERY).await.unwrap_err();
    assert!(matches!(err, TwitterSearchError::Auth { .. }), "{err:?}");
    assert_eq!(state.token_requests.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Hosted Scraper
// =============================================================================

struct ScraperState {
    final_status: &'static str,
    polls: AtomicUsize,
    runs: Mutex<Vec<(String, Value)>>,
}

impl ScraperState {
    fn finishing_as(final_status: &'static str) -> Arc<Self> {
        Arc::new(Self {
            final_status,
            polls: AtomicUsize::new(0),
            runs: Mutex::new(Vec::new()),
        })
    }
}

fn run_data(status: &str) -> Value {
    json!({"data": {"id": "run-1", "status": status, "defaultDatasetId": "ds-1"}})
}

async fn start_run(
    State(state): State<Arc<ScraperState>>,
    Path(actor): Path<String>,
    headers: HeaderMap,
    Json(input): Json<Value>,
) -> Response {
    if bearer(&headers) != Some(APIFY_TOKEN) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    state.runs.lock().unwrap().push((actor, input));
    (StatusCode::CREATED, Json(run_data("READY"))).into_response()
}

async fn poll_run(
    State(state): State<Arc<ScraperState>>,
    Path(run_id): Path<String>,
) -> Response {
    if run_id != "run-1" {
        return StatusCode::NOT_FOUND.into_response();
    }
    let polls = state.polls.fetch_add(1, Ordering::SeqCst) + 1;
    let status = if polls < 2 { "RUNNING" } else { state.final_status };
    Json(run_data(status)).into_response()
}

async fn dataset_items(Path(dataset_id): Path<String>) -> Response {
    if dataset_id != "ds-1" {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!([
        {"id": "1850000000000000001", "author": {"userName": "alice"}, "text": "watch"},
        {"noResults": true}
    ]))
    .into_response()
}

async fn scraper_backend(state: &Arc<ScraperState>, token: &str) -> ScraperBackend {
    let app = Router::new()
        .route("/acts/{actor}/runs", post(start_run))
        .route("/actor-runs/{run_id}", get(poll_run))
        .route("/datasets/{dataset_id}/items", get(dataset_items))
        .with_state(Arc::clone(state));
    let config = ScraperConfig {
        token: token.to_string(),
        ..ScraperConfig::default()
    };
    ScraperBackend::new(&config).with_base_url(serve(app).await)
}

#[tokio::test]
async fn scraper_polls_until_the_run_succeeds() {
    let state = ScraperState::finishing_as("SUCCEEDED");
    let backend = scraper_backend(&state, APIFY_TOKEN).await;

    let tweets = backend.search(QUERY).await.unwrap();

    assert_eq!(ids(&tweets), vec!["1850000000000000001"]);
    assert_eq!(tweets[0].screen_name.as_deref(), Some("alice"));
    assert_eq!(state.polls.load(Ordering::SeqCst), 2);

    let runs = state.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].0, DEFAULT_SCRAPER_ACTOR);
    assert_eq!(runs[0].1["searchTerms"], json!([QUERY]));
    assert_eq!(runs[0].1["maxItems"], 1000);
}

#[tokio::test]
async fn scraper_failed_run_is_an_error() {
    let state = ScraperState::finishing_as("TIMED-OUT");
    let backend = scraper_backend(&state, APIFY_TOKEN).await;

    let err = backend.search(QUERY).await.unwrap_err();

    match err {
        TwitterSearchError::RunFailed { run_id, status } => {
            assert_eq!(run_id, "run-1");
            assert_eq!(status, "TIMED-OUT");
        }
        other => panic!("expected a failed run, got {other:?}"),
    }
}

#[tokio::test]
async fn scraper_rejected_token_reports_the_status() {
    let state = ScraperState::finishing_as("SUCCEEDED");
    let backend = scraper_backend(&state, "wrong").await;

    let err = backend.search(QUERY).await.unwrap_err();

    assert!(
        matches!(err, TwitterSearchError::Api { status: 401, .. }),
        "{err:?}"
    );
    assert!(state.runs.lock().unwrap().is_empty());
}
