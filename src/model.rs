//! Data models shared by the pipeline stages.
//!
//! A run searches two kinds of keys: YouTube video IDs seeded from the
//! warehouse, and the screen names of the accounts that tweeted those
//! videos. Everything that differs between the two kinds (local tables,
//! query shape, export table name) hangs off [`KeyKind`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of key a search batch is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// YouTube video identifier (`v=` parameter).
    VideoId,
    /// Twitter screen name, discovered from video-ID tweets.
    ScreenName,
}

impl KeyKind {
    /// Both kinds, in the order the pipeline processes them.
    pub const ALL: [Self; 2] = [Self::VideoId, Self::ScreenName];

    /// Local table tracking keys of this kind and their processed flag.
    #[must_use]
    pub const fn key_table(self) -> &'static str {
        match self {
            Self::VideoId => "youtube_video_id",
            Self::ScreenName => "twitter_user",
        }
    }

    /// Key column of [`Self::key_table`].
    #[must_use]
    pub const fn key_column(self) -> &'static str {
        match self {
            Self::VideoId => "id",
            Self::ScreenName => "screen_name",
        }
    }

    /// Local table holding tweets found by searching keys of this kind.
    #[must_use]
    pub const fn tweet_table(self) -> &'static str {
        match self {
            Self::VideoId => "tweet_from_video_id",
            Self::ScreenName => "tweet_from_screen_name",
        }
    }

    /// Suffix of the warehouse table: `{backend}_{suffix}`.
    #[must_use]
    pub const fn table_suffix(self) -> &'static str {
        match self {
            Self::VideoId => "video_id",
            Self::ScreenName => "screen_name",
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_suffix())
    }
}

/// A tweet as returned by a search backend, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundTweet {
    /// Platform ID as a string (`id_str`).
    pub id_str: String,
    /// Author's screen name, when the backend reports one.
    pub screen_name: Option<String>,
    /// The backend's raw JSON for the tweet.
    pub raw: Value,
}

/// A tweet row read back from the scratch database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTweet {
    pub id_str: String,
    pub query: String,
    pub screen_name: Option<String>,
    pub tweet: Value,
}

/// Row counts of the scratch database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCounts {
    pub video_ids: i64,
    pub video_ids_pending: i64,
    pub screen_names: i64,
    pub screen_names_pending: i64,
    pub tweets_from_video_id: i64,
    pub tweets_from_screen_name: i64,
}

/// One uploaded export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedTable {
    /// Warehouse table the file belongs to (`{backend}_{kind}`).
    pub table: String,
    /// Object key inside the data bucket.
    pub key: String,
    /// Number of JSON lines written.
    pub records: usize,
}

/// Outcome of a complete run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub backend: String,
    pub reference_date: String,
    pub video_batches: usize,
    pub screen_name_batches: usize,
    pub resumes: usize,
    pub counts: StorageCounts,
    pub exported: Vec<ExportedTable>,
    pub additions_registered: Option<usize>,
}
