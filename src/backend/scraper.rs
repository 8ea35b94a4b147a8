//! `twint` backend: hosted tweet-scraper actor on Apify.

use super::SearchBackend;
use crate::config::ScraperConfig;
use crate::error::{Result, TwitterSearchError};
use crate::model::FoundTweet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

const BASE_URL: &str = "https://api.apify.com/v2";

/// Input for the apidojo/tweet-scraper actor.
#[derive(Debug, Clone, Serialize)]
struct TweetSearchInput {
    #[serde(rename = "searchTerms")]
    search_terms: Vec<String>,
    sort: &'static str,
    #[serde(rename = "maxItems")]
    max_items: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
struct RunData {
    id: String,
    status: String,
    #[serde(rename = "defaultDatasetId")]
    default_dataset_id: String,
}

/// Runs each query through the scraper actor and reads its dataset.
pub struct ScraperBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
    actor: String,
    max_items: u32,
}

impl ScraperBackend {
    #[must_use]
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
            token: config.token.clone(),
            actor: config.actor.clone(),
            max_items: config.max_items,
        }
    }

    /// Send requests to `base_url` instead of the public Apify host.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let resp = request.bearer_auth(&self.token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TwitterSearchError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.json().await?)
    }

    async fn start_run(&self, query: &str) -> Result<RunData> {
        let input = TweetSearchInput {
            search_terms: vec![query.to_string()],
            sort: "Latest",
            max_items: self.max_items,
        };
        let url = format!("{}/acts/{}/runs", self.base_url, self.actor);
        let resp: ApiResponse<RunData> = self.send(self.client.post(&url).json(&input)).await?;
        Ok(resp.data)
    }

    /// Poll until a run completes, long-polling up to a minute per request.
    async fn wait_for_run(&self, run_id: &str) -> Result<RunData> {
        loop {
            let url = format!("{}/actor-runs/{run_id}?waitForFinish=60", self.base_url);
            let resp: ApiResponse<RunData> = self.send(self.client.get(&url)).await?;
            match resp.data.status.as_str() {
                "SUCCEEDED" => return Ok(resp.data),
                "FAILED" | "ABORTED" | "TIMED-OUT" => {
                    return Err(TwitterSearchError::RunFailed {
                        run_id: resp.data.id,
                        status: resp.data.status,
                    });
                }
                _ => debug!(run_id, status = %resp.data.status, "Run still in progress"),
            }
        }
    }

    async fn dataset_items(&self, dataset_id: &str) -> Result<Vec<Value>> {
        let url = format!("{}/datasets/{dataset_id}/items?format=json", self.base_url);
        self.send(self.client.get(&url)).await
    }
}

#[async_trait]
impl SearchBackend for ScraperBackend {
    fn name(&self) -> &'static str {
        "twint"
    }

    async fn search(&self, query: &str) -> Result<Vec<FoundTweet>> {
        let run = self.start_run(query).await?;
        debug!(run_id = %run.id, "Scraper run started");
        let completed = self.wait_for_run(&run.id).await?;
        let items = self.dataset_items(&completed.default_dataset_id).await?;
        let total = items.len();
        let tweets: Vec<FoundTweet> = items.into_iter().filter_map(found_tweet).collect();
        info!(
            run_id = %completed.id,
            items = total,
            tweets = tweets.len(),
            "Scraper run finished"
        );
        Ok(tweets)
    }
}

/// Normalize one dataset item. Items without an ID are placeholders
/// (`{"noResults": true}`) and are dropped.
fn found_tweet(item: Value) -> Option<FoundTweet> {
    let id_str = match item.get("id")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let screen_name = item
        .pointer("/author/userName")
        .or_else(|| item.pointer("/author/screen_name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(FoundTweet {
        id_str,
        screen_name,
        raw: item,
    })
}
