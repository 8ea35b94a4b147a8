//! CLI definitions for twitter-search.
//!
//! Uses clap for argument parsing with derive macros.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// twitter-search - find the tweets that share new YouTube videos
#[derive(Parser, Debug)]
#[command(name = "twitter-search")]
#[command(version)]
#[command(about = "Daily search of Twitter for newly discovered YouTube videos")]
#[command(long_about = r#"
twitter-search reads yesterday's new YouTube video IDs from the warehouse,
searches Twitter for tweets linking to them, then searches the recent
YouTube links of every author found. Results are exported as compressed
NDJSON to the data bucket, partitioned by reference date.

Each key is searched once per run, in OR-queries of up to five keys, with
the configured filter terms excluded.

Example:
  twitter-search --config s3://admin-bucket/config/twitter.toml --method tweepy
"#)]
pub struct Cli {
    /// Configuration file: s3://bucket/key or a local path
    #[arg(long, short = 'c')]
    pub config: String,

    /// Search backend
    #[arg(long, short = 'm')]
    pub method: SearchMethod,

    /// Scratch directory for the database and intermediate files
    #[arg(long, env = "TWITTER_SEARCH_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Also publish today's new video IDs for the next run
    #[arg(long)]
    pub register_additions: bool,

    /// Output format of the run summary
    #[arg(long, short = 'f', default_value = "text")]
    pub format: OutputFormat,

    /// Be verbose (show debug info)
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Be quiet (suppress non-error output)
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

/// Which search mechanism fetches tweets.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMethod {
    /// Hosted tweet scraper
    #[value(alias = "scraper")]
    Twint,
    /// Twitter standard search API
    #[value(alias = "api")]
    Tweepy,
}

impl SearchMethod {
    /// Name used in exported table names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Twint => "twint",
            Self::Tweepy => "tweepy",
        }
    }
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
