//! twitter-search - daily Twitter search for newly discovered YouTube videos
//!
//! This library provides the pipeline that cross-references YouTube video
//! IDs from the warehouse with Twitter search results and exports what it
//! finds to object storage.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`config`] - Layered TOML configuration
//! - [`error`] - Custom error types with rich context
//! - [`query`] - Search query construction and batching limits
//! - [`queries`] - Warehouse SQL templates
//! - [`storage`] - `SQLite` scratch storage
//! - [`backend`] - Search backends (`twint`, `tweepy`)
//! - [`warehouse`] - Athena query layer
//! - [`object_store`] - S3 access
//! - [`export`] - NDJSON export and partition registration
//! - [`pipeline`] - The run orchestrator
//! - [`run_log`] - Run log publication

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod model;
pub mod object_store;
pub mod pipeline;
pub mod queries;
pub mod query;
pub mod retry;
pub mod run_log;
pub mod storage;
pub mod warehouse;

pub use cli::{Cli, OutputFormat, SearchMethod};
pub use config::Config;
pub use error::{Result, TwitterSearchError};
pub use model::*;
pub use pipeline::{RunSettings, TwitterSearch};
pub use storage::Storage;

/// Application name, used in the run log partition.
pub const APP_NAME: &str = "twitter-search";

/// Scratch database filename inside the work directory.
pub const DEFAULT_DB_NAME: &str = "twitter_search.sqlite";

/// Standard width for major header dividers in CLI output
pub const HEADER_DIVIDER_WIDTH: usize = 60;

/// Get the default work directory for twitter-search
#[must_use]
pub fn default_work_dir() -> std::path::PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(APP_NAME)
}

/// Format an integer with thousands separators.
#[must_use]
pub fn format_number(value: i64) -> String {
    let abs = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(abs.len() + abs.len() / 3);

    for (idx, ch) in abs.chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    let mut formatted: String = out.chars().rev().collect();
    if value < 0 {
        formatted.insert(0, '-');
    }
    formatted
}

/// Format a usize with thousands separators.
#[must_use]
pub fn format_number_usize(value: usize) -> String {
    format_number(i64::try_from(value).unwrap_or(i64::MAX))
}
