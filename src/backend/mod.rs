//! Search backends.
//!
//! A backend turns one query string into the tweets it matches. Two
//! interchangeable implementations exist:
//!
//! - [`ScraperBackend`] (`twint`): a hosted tweet-scraper actor
//! - [`ApiBackend`] (`tweepy`): the Twitter standard search API
//!
//! The backend name is part of the exported table names, so it stays
//! stable even though the mechanism behind it changed.

mod api;
mod scraper;

pub use api::ApiBackend;
pub use scraper::ScraperBackend;

use crate::cli::SearchMethod;
use crate::config::Config;
use crate::error::Result;
use crate::model::FoundTweet;
use async_trait::async_trait;
use std::sync::Arc;

/// Fetches the tweets matching a query.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Stable name used in warehouse table names (`twint`, `tweepy`).
    fn name(&self) -> &'static str;

    /// Run `query` and return every tweet the service reports for it.
    async fn search(&self, query: &str) -> Result<Vec<FoundTweet>>;
}

/// Build the backend selected on the command line.
#[must_use]
pub fn build_backend(method: SearchMethod, config: &Config) -> Arc<dyn SearchBackend> {
    match method {
        SearchMethod::Twint => Arc::new(ScraperBackend::new(&config.scraper)),
        SearchMethod::Tweepy => Arc::new(ApiBackend::new(&config.twitter, &config.search)),
    }
}
