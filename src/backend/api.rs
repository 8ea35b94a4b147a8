//! `tweepy` backend: Twitter standard search API (v1.1).
//!
//! Authenticates application-only: a configured bearer token is used as
//! is, otherwise one is exchanged for the consumer key and secret on the
//! first search and reused for the rest of the run. Results are paged
//! backwards with `max_id` until an empty page. A 429 answer is waited
//! out instead of being treated as a failure.

use super::SearchBackend;
use crate::config::{SearchConfig, TwitterConfig};
use crate::error::{Result, TwitterSearchError};
use crate::model::FoundTweet;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const API_BASE: &str = "https://api.twitter.com";
const PAGE_SIZE: &str = "100";

/// Longest wait accepted from a rate-limit reset header (one window).
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token_type: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    statuses: Vec<Value>,
}

/// Twitter standard search with app-only authentication.
pub struct ApiBackend {
    client: reqwest::Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
    token: OnceCell<String>,
    max_pages: u32,
}

impl ApiBackend {
    #[must_use]
    pub fn new(twitter: &TwitterConfig, search: &SearchConfig) -> Self {
        let token = twitter
            .bearer_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .map_or_else(OnceCell::new, |t| OnceCell::new_with(Some(t)));
        Self {
            client: reqwest::Client::new(),
            base_url: API_BASE.to_string(),
            consumer_key: twitter.consumer_key.clone(),
            consumer_secret: twitter.consumer_secret.clone(),
            token,
            max_pages: search.max_pages,
        }
    }

    /// Send requests to `base_url` instead of the public API host.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn bearer_token(&self) -> Result<&str> {
        let token = self
            .token
            .get_or_try_init(|| self.request_token())
            .await?;
        Ok(token.as_str())
    }

    async fn request_token(&self) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/oauth2/token", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                basic_auth_header(&self.consumer_key, &self.consumer_secret),
            )
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded;charset=UTF-8",
            )
            .body("grant_type=client_credentials")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TwitterSearchError::Auth {
                reason: format!("token request returned {status}: {body}"),
            });
        }
        let token: TokenResponse = resp.json().await?;
        if !token.token_type.eq_ignore_ascii_case("bearer") {
            return Err(TwitterSearchError::Auth {
                reason: format!("unexpected token type '{}'", token.token_type),
            });
        }
        info!("Obtained application-only bearer token");
        Ok(token.access_token)
    }

    /// Fetch one page, waiting out rate limits.
    async fn fetch_page(&self, query: &str, max_id: Option<u64>) -> Result<SearchPage> {
        let token = self.bearer_token().await?;
        loop {
            let mut request = self
                .client
                .get(format!("{}/1.1/search/tweets.json", self.base_url))
                .bearer_auth(token)
                .query(&[
                    ("q", query),
                    ("result_type", "recent"),
                    ("count", PAGE_SIZE),
                    ("include_entities", "true"),
                ]);
            if let Some(max_id) = max_id {
                request = request.query(&[("max_id", max_id.to_string())]);
            }
            let resp = request.send().await?;

            match resp.status() {
                status if status.is_success() => return Ok(resp.json().await?),
                StatusCode::TOO_MANY_REQUESTS => {
                    let reset = resp
                        .headers()
                        .get("x-rate-limit-reset")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<i64>().ok());
                    let wait = rate_limit_wait(reset, Utc::now().timestamp());
                    warn!(wait_secs = wait.as_secs(), "Rate limit reached, waiting for reset");
                    tokio::time::sleep(wait).await;
                }
                StatusCode::UNAUTHORIZED => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(TwitterSearchError::Auth { reason: body });
                }
                status => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(TwitterSearchError::Api {
                        status: status.as_u16(),
                        message: body,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl SearchBackend for ApiBackend {
    fn name(&self) -> &'static str {
        "tweepy"
    }

    async fn search(&self, query: &str) -> Result<Vec<FoundTweet>> {
        let mut tweets = Vec::new();
        let mut max_id = None;
        let mut pages = 0u32;

        loop {
            let page = self.fetch_page(query, max_id).await?;
            pages += 1;
            if page.statuses.is_empty() {
                break;
            }
            let next = next_max_id(&page.statuses);
            let found: Vec<FoundTweet> =
                page.statuses.into_iter().filter_map(found_tweet).collect();
            debug!(page = pages, tweets = found.len(), "Fetched search page");
            tweets.extend(found);

            if self.max_pages > 0 && pages >= self.max_pages {
                break;
            }
            match next {
                Some(id) if max_id.is_none_or(|current| id < current) => max_id = Some(id),
                _ => break,
            }
        }

        info!(pages, tweets = tweets.len(), "Search API query finished");
        Ok(tweets)
    }
}

/// `Basic` header value for the app-only token exchange.
fn basic_auth_header(key: &str, secret: &str) -> String {
    let credentials = format!(
        "{}:{}",
        utf8_percent_encode(key, NON_ALPHANUMERIC),
        utf8_percent_encode(secret, NON_ALPHANUMERIC)
    );
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(credentials)
    )
}

/// Time to sleep until the rate-limit window resets.
fn rate_limit_wait(reset_epoch: Option<i64>, now_epoch: i64) -> Duration {
    let Some(reset) = reset_epoch else {
        return MAX_RATE_LIMIT_WAIT;
    };
    let secs = u64::try_from(reset.saturating_sub(now_epoch)).unwrap_or(0);
    // One extra second so the retry lands after the reset instant.
    Duration::from_secs(secs + 1).min(MAX_RATE_LIMIT_WAIT)
}

fn status_id(status: &Value) -> Option<u64> {
    status
        .get("id_str")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .or_else(|| status.get("id").and_then(Value::as_u64))
}

/// The `max_id` of the next older page: one below the smallest ID seen.
fn next_max_id(statuses: &[Value]) -> Option<u64> {
    statuses
        .iter()
        .filter_map(status_id)
        .min()
        .and_then(|id| id.checked_sub(1))
}

fn found_tweet(status: Value) -> Option<FoundTweet> {
    let id_str = status_id(&status)?.to_string();
    let screen_name = status
        .pointer("/user/screen_name")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(FoundTweet {
        id_str,
        screen_name,
        raw: status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn basic_auth_encodes_credentials() {
        assert_eq!(basic_auth_header("key", "secret"), "Basic a2V5OnNlY3JldA==");
        // Reserved characters are percent-encoded before base64.
        let header = basic_auth_header("k+y", "s");
        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, b"k%2By:s");
    }

    #[test]
    fn rate_limit_wait_until_reset() {
        assert_eq!(rate_limit_wait(Some(1_000_060), 1_000_000), Duration::from_secs(61));
        assert_eq!(rate_limit_wait(Some(999_000), 1_000_000), Duration::from_secs(1));
        assert_eq!(rate_limit_wait(None, 1_000_000), MAX_RATE_LIMIT_WAIT);
        assert_eq!(rate_limit_wait(Some(i64::MAX), 0), MAX_RATE_LIMIT_WAIT);
    }

    #[test]
    fn next_max_id_is_below_oldest() {
        let statuses = vec![
            json!({"id_str": "1850000000000000300"}),
            json!({"id_str": "1850000000000000100"}),
            json!({"id": 1_850_000_000_000_000_200_u64}),
        ];
        assert_eq!(next_max_id(&statuses), Some(1_850_000_000_000_000_099));
        assert_eq!(next_max_id(&[]), None);
    }

    #[test]
    fn parses_search_page() {
        let page: SearchPage = serde_json::from_value(json!({
            "statuses": [
                {"id_str": "20", "user": {"screen_name": "alice"}, "text": "a"},
                {"id_str": "not-a-number"}
            ],
            "search_metadata": {"count": 100}
        }))
        .unwrap();
        let tweets: Vec<FoundTweet> = page.statuses.into_iter().filter_map(found_tweet).collect();
        assert_eq!(tweets.len(), 1);
        assert_eq!(tweets[0].id_str, "20");
        assert_eq!(tweets[0].screen_name.as_deref(), Some("alice"));

        let empty: SearchPage = serde_json::from_value(json!({})).unwrap();
        assert!(empty.statuses.is_empty());
    }

    #[test]
    fn configured_bearer_token_skips_exchange() {
        let twitter = TwitterConfig {
            bearer_token: Some("preset".to_string()),
            ..TwitterConfig::default()
        };
        let backend = ApiBackend::new(&twitter, &SearchConfig::default());
        assert_eq!(backend.token.get().map(String::as_str), Some("preset"));

        let backend = ApiBackend::new(&TwitterConfig::default(), &SearchConfig::default());
        assert!(backend.token.get().is_none());
    }
}
