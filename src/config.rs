//! Configuration system for twitter-search.
//!
//! Provides layered configuration from multiple sources:
//!
//! 1. **Compiled defaults** - retry budgets, scraper actor, page limits
//! 2. **Config file** - TOML fetched from `s3://bucket/key` or a local path
//! 3. **Environment variables** - secrets and the filter name
//!
//! # Example Configuration File
//!
//! ```toml
//! [aws]
//! athena-data = "internet_scholar"
//! athena-admin = "internet_scholar_admin"
//! s3-admin = "internet-scholar-admin"
//! s3-data = "internet-scholar"
//!
//! [twitter]
//! consumer_key = "..."
//! consumer_secret = "..."
//!
//! [scraper]
//! token = "..."
//!
//! [parameter]
//! filter = "youtube"
//! ```

use crate::cli::SearchMethod;
use crate::error::{Result, TwitterSearchError};
use crate::object_store::{ObjectStore, parse_s3_url};
use crate::retry::DEFAULT_MAX_RETRIES;
use crate::warehouse::DEFAULT_QUERY_TIMEOUT;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Default Apify actor: apidojo/tweet-scraper.
pub const DEFAULT_SCRAPER_ACTOR: &str = "61RPP7dywgiy0JPD0";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Warehouse databases and buckets.
    pub aws: AwsConfig,
    /// Credentials for the API backend.
    pub twitter: TwitterConfig,
    /// Credentials and limits for the scraper backend.
    pub scraper: ScraperConfig,
    /// Run parameters.
    pub parameter: ParameterConfig,
    /// Retry and pagination limits.
    pub search: SearchConfig,
}

/// AWS resources. Key names match the historical config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Region override; the SDK default chain is used when absent.
    pub region: Option<String>,
    /// Athena database holding the data tables.
    #[serde(rename = "athena-data")]
    pub athena_data: String,
    /// Athena database holding the run log table.
    #[serde(rename = "athena-admin")]
    pub athena_admin: String,
    /// Bucket for query results and run logs.
    #[serde(rename = "s3-admin")]
    pub s3_admin: String,
    /// Bucket for exported data.
    #[serde(rename = "s3-data")]
    pub s3_data: String,
    /// Longest wait for one warehouse query before it is stopped.
    #[serde(rename = "query-timeout-secs")]
    pub query_timeout_secs: u64,
}

/// Twitter API application credentials.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TwitterConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Pre-issued app-only token; skips the token exchange when set.
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for TwitterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitterConfig")
            .field("consumer_key", &redact(&self.consumer_key))
            .field("consumer_secret", &redact(&self.consumer_secret))
            .field("bearer_token", &self.bearer_token.as_deref().map(redact))
            .finish()
    }
}

/// Hosted scraper settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Apify API token.
    pub token: String,
    /// Actor ID running the tweet search.
    pub actor: String,
    /// Upper bound of items requested per query.
    pub max_items: u32,
}

impl std::fmt::Debug for ScraperConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperConfig")
            .field("token", &redact(&self.token))
            .field("actor", &self.actor)
            .field("max_items", &self.max_items)
            .finish()
    }
}

/// Run parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParameterConfig {
    /// Name of the `twitter_filter` row whose terms are excluded.
    pub filter: String,
}

/// Retry and pagination limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Retries of a failed search call.
    pub max_retries: u32,
    /// Consecutive collection failures tolerated before giving up.
    pub resume_tolerance: u32,
    /// Result pages fetched per API query (0 = until exhausted).
    pub max_pages: u32,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            athena_data: String::new(),
            athena_admin: String::new(),
            s3_admin: String::new(),
            s3_data: String::new(),
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT.as_secs(),
        }
    }
}

impl AwsConfig {
    /// Query wait bound as a [`Duration`].
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            actor: DEFAULT_SCRAPER_ACTOR.to_string(),
            max_items: 1000,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            resume_tolerance: 5,
            max_pages: 0,
        }
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "<unset>" } else { "<redacted>" }
}

impl Config {
    /// Load configuration from an `s3://` URL or a local path, then apply
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be fetched or parsed.
    pub async fn load(location: &str, store: &dyn ObjectStore) -> Result<Self> {
        let content = if location.starts_with("s3://") {
            let (bucket, key) = parse_s3_url(location)?;
            store.get_bytes(&bucket, &key).await.map_err(|e| {
                debug!(error = %e, "Config download failed");
                TwitterSearchError::ConfigNotFound {
                    location: location.to_string(),
                }
            })?
        } else {
            Self::read_local(Path::new(location))?
        };

        let mut config = Self::parse(location, &content)?;
        config.apply_env_overrides_with(|key| std::env::var(key).ok());
        info!(location, "Loaded configuration");
        debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    fn read_local(path: &Path) -> Result<Vec<u8>> {
        if !path.exists() {
            return Err(TwitterSearchError::ConfigNotFound {
                location: path.display().to_string(),
            });
        }
        std::fs::read(path).map_err(|e| TwitterSearchError::path_error("read", path, e))
    }

    /// Parse TOML configuration content.
    ///
    /// # Errors
    ///
    /// Returns [`TwitterSearchError::ConfigError`] on invalid UTF-8 or TOML.
    pub fn parse(location: &str, content: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(content).map_err(|e| TwitterSearchError::ConfigError {
            location: location.to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(text).map_err(|e| TwitterSearchError::ConfigError {
            location: location.to_string(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty("TWITTER_BEARER_TOKEN") {
            self.twitter.bearer_token = Some(token);
        }
        if let Some(key) = non_empty("TWITTER_CONSUMER_KEY") {
            self.twitter.consumer_key = key;
        }
        if let Some(secret) = non_empty("TWITTER_CONSUMER_SECRET") {
            self.twitter.consumer_secret = secret;
        }
        if let Some(token) = non_empty("APIFY_TOKEN") {
            self.scraper.token = token;
        }
        if let Some(filter) = non_empty("TWITTER_SEARCH_FILTER") {
            self.parameter.filter = filter;
        }
    }

    /// Check that every setting needed by `method` is present.
    ///
    /// # Errors
    ///
    /// Returns [`TwitterSearchError::MissingSetting`] naming the first gap.
    pub fn validate(&self, method: SearchMethod) -> Result<()> {
        let required = [
            ("aws.athena-data", &self.aws.athena_data),
            ("aws.athena-admin", &self.aws.athena_admin),
            ("aws.s3-admin", &self.aws.s3_admin),
            ("aws.s3-data", &self.aws.s3_data),
            ("parameter.filter", &self.parameter.filter),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(TwitterSearchError::missing_setting(key));
            }
        }

        match method {
            SearchMethod::Tweepy => {
                let has_bearer = self
                    .twitter
                    .bearer_token
                    .as_deref()
                    .is_some_and(|t| !t.trim().is_empty());
                if !has_bearer {
                    if self.twitter.consumer_key.trim().is_empty() {
                        return Err(TwitterSearchError::missing_setting("twitter.consumer_key"));
                    }
                    if self.twitter.consumer_secret.trim().is_empty() {
                        return Err(TwitterSearchError::missing_setting(
                            "twitter.consumer_secret",
                        ));
                    }
                }
            }
            SearchMethod::Twint => {
                if self.scraper.token.trim().is_empty() {
                    return Err(TwitterSearchError::missing_setting("scraper.token"));
                }
            }
        }
        Ok(())
    }
}
