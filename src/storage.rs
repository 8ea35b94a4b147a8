//! `SQLite` scratch storage for one run.
//!
//! Tracks which video IDs and screen names still need searching and keeps
//! every tweet found, deduplicated by platform ID (first writer wins).

use crate::error::Result;
use crate::model::{FoundTweet, KeyKind, StorageCounts, StoredTweet};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;

/// `SQLite` storage manager
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let storage = Self { conn };
        storage.migrate()?;
        debug!(path = %db_path.as_ref().display(), "Opened scratch database");
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> Result<()> {
        let current_version = self.get_schema_version();

        if current_version < SCHEMA_VERSION {
            info!(
                "Migrating scratch database from version {} to {}",
                current_version, SCHEMA_VERSION
            );
            self.create_schema()?;
            self.conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }

        Ok(())
    }

    fn get_schema_version(&self) -> i32 {
        let result: std::result::Result<i32, _> = self.conn.query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| {
                let value: String = row.get(0)?;
                Ok(value.parse().unwrap_or(0))
            },
        );

        // Treat missing schema table as version 0.
        result.unwrap_or_default()
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS youtube_video_id (
                id TEXT PRIMARY KEY,
                processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS twitter_user (
                screen_name TEXT PRIMARY KEY COLLATE NOCASE,
                processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS tweet_from_video_id (
                id_str TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                screen_name TEXT,
                tweet TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS tweet_from_screen_name (
                id_str TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                screen_name TEXT,
                tweet TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            ",
        )?;

        Ok(())
    }

    /// Insert keys that are not tracked yet. Returns how many were new.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert transaction fails.
    pub fn seed_keys<I, S>(&mut self, kind: KeyKind, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let sql = format!(
                "INSERT OR IGNORE INTO {} ({}) VALUES (?)",
                kind.key_table(),
                kind.key_column()
            );
            let mut stmt = tx.prepare(&sql)?;
            for key in keys {
                let key = key.as_ref().trim();
                if key.is_empty() {
                    continue;
                }
                inserted += stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        info!(kind = %kind, inserted, "Seeded keys");
        Ok(inserted)
    }

    /// Take up to `limit` unprocessed keys, oldest first, and mark them
    /// processed in the same transaction.
    ///
    /// An empty result means nothing is left to search.
    ///
    /// # Errors
    ///
    /// Returns an error if the select or update fails.
    pub fn claim_batch(&mut self, kind: KeyKind, limit: usize) -> Result<Vec<String>> {
        let table = kind.key_table();
        let column = kind.key_column();
        let tx = self.conn.transaction()?;
        let batch = {
            let mut select = tx.prepare(&format!(
                "SELECT {column} FROM {table} WHERE processed = 0 ORDER BY rowid LIMIT ?"
            ))?;
            let keys = select
                .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut update =
                tx.prepare(&format!("UPDATE {table} SET processed = 1 WHERE {column} = ?"))?;
            for key in &keys {
                update.execute(params![key])?;
            }
            keys
        };
        tx.commit()?;
        Ok(batch)
    }

    /// Number of keys of `kind` not searched yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the count query fails.
    pub fn pending_count(&self, kind: KeyKind) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE processed = 0",
            kind.key_table()
        );
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Whether `key` has been marked processed. `None` if it is not tracked.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn is_processed(&self, kind: KeyKind, key: &str) -> Result<Option<bool>> {
        let sql = format!(
            "SELECT processed FROM {} WHERE {} = ?",
            kind.key_table(),
            kind.key_column()
        );
        Ok(self
            .conn
            .query_row(&sql, params![key], |row| row.get::<_, i64>(0))
            .optional()?
            .map(|flag| flag != 0))
    }

    /// Store tweets found by `query`. Tweets already stored are left untouched.
    ///
    /// Returns the number of newly stored tweets.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the insert transaction fails.
    pub fn store_tweets(
        &mut self,
        kind: KeyKind,
        query: &str,
        tweets: &[FoundTweet],
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {} (id_str, query, screen_name, tweet) VALUES (?, ?, ?, ?)",
                kind.tweet_table()
            ))?;
            for tweet in tweets {
                count += stmt.execute(params![
                    tweet.id_str,
                    query,
                    tweet.screen_name,
                    serde_json::to_string(&tweet.raw)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(kind = %kind, found = tweets.len(), stored = count, "Stored tweets");
        Ok(count)
    }

    /// Track every author of a video-ID tweet as a screen name to search.
    ///
    /// Returns the number of newly tracked screen names.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn promote_authors(&self) -> Result<usize> {
        let inserted = self.conn.execute(
            r"
            INSERT OR IGNORE INTO twitter_user (screen_name)
            SELECT DISTINCT screen_name
            FROM tweet_from_video_id
            WHERE screen_name IS NOT NULL AND screen_name <> ''
            ORDER BY screen_name
            ",
            [],
        )?;
        info!(inserted, "Promoted tweet authors to screen-name search");
        Ok(inserted)
    }

    /// All tweets stored for `kind`, ordered by platform ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored blob is not valid JSON.
    pub fn tweet_records(&self, kind: KeyKind) -> Result<Vec<StoredTweet>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id_str, query, screen_name, tweet FROM {} ORDER BY length(id_str), id_str",
            kind.tweet_table()
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id_str, query, screen_name, tweet)| {
                Ok(StoredTweet {
                    id_str,
                    query,
                    screen_name,
                    tweet: serde_json::from_str(&tweet)?,
                })
            })
            .collect()
    }

    /// Row counts for the run summary.
    ///
    /// # Errors
    ///
    /// Returns an error if any count query fails.
    pub fn counts(&self) -> Result<StorageCounts> {
        let count =
            |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };
        Ok(StorageCounts {
            video_ids: count("SELECT COUNT(*) FROM youtube_video_id")?,
            video_ids_pending: self.pending_count(KeyKind::VideoId)?,
            screen_names: count("SELECT COUNT(*) FROM twitter_user")?,
            screen_names_pending: self.pending_count(KeyKind::ScreenName)?,
            tweets_from_video_id: count("SELECT COUNT(*) FROM tweet_from_video_id")?,
            tweets_from_screen_name: count("SELECT COUNT(*) FROM tweet_from_screen_name")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn found(id: &str, screen_name: Option<&str>) -> FoundTweet {
        FoundTweet {
            id_str: id.to_string(),
            screen_name: screen_name.map(str::to_string),
            raw: json!({ "id_str": id, "text": format!("tweet {id}") }),
        }
    }

    #[test]
    fn test_create_database() {
        let storage = Storage::open_memory().unwrap();
        assert_eq!(storage.counts().unwrap(), StorageCounts::default());
    }

    #[test]
    fn test_open_file_database_twice() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scratch.sqlite");
        {
            let mut storage = Storage::open(&path).unwrap();
            storage.seed_keys(KeyKind::VideoId, ["abc"]).unwrap();
        }
        let storage = Storage::open(&path).unwrap();
        assert_eq!(storage.pending_count(KeyKind::VideoId).unwrap(), 1);
    }

    #[test]
    fn test_seed_ignores_duplicates_and_blanks() {
        let mut storage = Storage::open_memory().unwrap();
        let inserted = storage
            .seed_keys(KeyKind::VideoId, ["a", "b", "a", " ", "c"])
            .unwrap();
        assert_eq!(inserted, 3);
        assert_eq!(
            storage.seed_keys(KeyKind::VideoId, ["a", "d"]).unwrap(),
            1
        );
    }

    #[test]
    fn test_claim_batch_boundary() {
        let mut storage = Storage::open_memory().unwrap();
        let ids: Vec<String> = (1..=11).map(|i| format!("v{i}")).collect();
        storage.seed_keys(KeyKind::VideoId, &ids).unwrap();

        let first = storage.claim_batch(KeyKind::VideoId, 5).unwrap();
        assert_eq!(first, vec!["v1", "v2", "v3", "v4", "v5"]);
        let second = storage.claim_batch(KeyKind::VideoId, 5).unwrap();
        assert_eq!(second, vec!["v6", "v7", "v8", "v9", "v10"]);
        let third = storage.claim_batch(KeyKind::VideoId, 5).unwrap();
        assert_eq!(third, vec!["v11"]);
        assert!(storage.claim_batch(KeyKind::VideoId, 5).unwrap().is_empty());
        assert_eq!(storage.pending_count(KeyKind::VideoId).unwrap(), 0);
    }

    #[test]
    fn test_claim_marks_processed() {
        let mut storage = Storage::open_memory().unwrap();
        storage.seed_keys(KeyKind::VideoId, ["a", "b"]).unwrap();
        assert_eq!(storage.is_processed(KeyKind::VideoId, "a").unwrap(), Some(false));
        storage.claim_batch(KeyKind::VideoId, 1).unwrap();
        assert_eq!(storage.is_processed(KeyKind::VideoId, "a").unwrap(), Some(true));
        assert_eq!(storage.is_processed(KeyKind::VideoId, "b").unwrap(), Some(false));
        assert_eq!(storage.is_processed(KeyKind::VideoId, "zzz").unwrap(), None);
    }

    #[test]
    fn test_store_tweets_first_writer_wins() {
        let mut storage = Storage::open_memory().unwrap();
        let stored = storage
            .store_tweets(KeyKind::VideoId, "q1", &[found("1", Some("alice")), found("2", None)])
            .unwrap();
        assert_eq!(stored, 2);

        let stored = storage
            .store_tweets(KeyKind::VideoId, "q2", &[found("2", Some("bob")), found("3", None)])
            .unwrap();
        assert_eq!(stored, 1);

        let records = storage.tweet_records(KeyKind::VideoId).unwrap();
        assert_eq!(records.len(), 3);
        let second = records.iter().find(|r| r.id_str == "2").unwrap();
        assert_eq!(second.query, "q1");
        assert_eq!(second.screen_name, None);
    }

    #[test]
    fn test_tweet_records_numeric_order() {
        let mut storage = Storage::open_memory().unwrap();
        storage
            .store_tweets(KeyKind::ScreenName, "q", &[found("100", None), found("99", None)])
            .unwrap();
        let ids: Vec<String> = storage
            .tweet_records(KeyKind::ScreenName)
            .unwrap()
            .into_iter()
            .map(|r| r.id_str)
            .collect();
        assert_eq!(ids, vec!["99", "100"]);
    }

    #[test]
    fn test_promote_authors_case_insensitive() {
        let mut storage = Storage::open_memory().unwrap();
        storage
            .store_tweets(
                KeyKind::VideoId,
                "q",
                &[
                    found("1", Some("Alice")),
                    found("2", Some("alice")),
                    found("3", Some("bob")),
                    found("4", None),
                ],
            )
            .unwrap();

        assert_eq!(storage.promote_authors().unwrap(), 2);
        assert_eq!(storage.promote_authors().unwrap(), 0);
        assert_eq!(storage.pending_count(KeyKind::ScreenName).unwrap(), 2);
    }
}
