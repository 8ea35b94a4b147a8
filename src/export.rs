//! Export of collected tweets to the data bucket.
//!
//! Each tweet table becomes one bzip2-compressed NDJSON object under
//! `{backend}_{kind}/reference_date=YYYY-MM-DD/tweets.json.bz2`, after
//! which the warehouse table's partitions are repaired so the new
//! partition is queryable.

use crate::error::{Result, TwitterSearchError};
use crate::model::{ExportedTable, KeyKind, StoredTweet};
use crate::object_store::ObjectStore;
use crate::queries::{ADDITIONS_TABLE, NEW_VIDEOS_TODAY, repair_table};
use crate::storage::Storage;
use crate::warehouse::{Warehouse, read_column};
use bzip2::write::BzEncoder;
use chrono::{DateTime, NaiveDate, Utc};
use flate2::write::GzEncoder;
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// Twitter's classic timestamp format: `Wed Oct 10 20:19:24 +0000 2018`.
const TWITTER_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Athena's timestamp literal format.
const ATHENA_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Convert a Twitter or RFC 3339 timestamp to Athena's format in UTC.
///
/// Returns `None` when `value` is in neither format.
#[must_use]
pub fn normalize_timestamp(value: &str) -> Option<String> {
    DateTime::parse_from_str(value, TWITTER_DATE_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format(ATHENA_DATE_FORMAT).to_string())
}

/// Normalize every `created_at`/`createdAt` string in `value`, at any depth.
pub fn normalize_timestamps(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if key == "created_at" || key == "createdAt" {
                    if let Value::String(s) = field {
                        if let Some(normalized) = normalize_timestamp(s) {
                            *s = normalized;
                        }
                        continue;
                    }
                }
                normalize_timestamps(field);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_timestamps),
        _ => {}
    }
}

/// Shape one stored tweet into its exported JSON line.
#[must_use]
pub fn export_record(stored: StoredTweet) -> Value {
    let mut tweet = stored.tweet;
    normalize_timestamps(&mut tweet);
    if let Value::Object(map) = &mut tweet {
        map.insert("search_query".to_string(), Value::String(stored.query));
    }
    tweet
}

/// Check that a warehouse date is `YYYY-MM-DD` before it names a partition.
///
/// # Errors
///
/// Returns [`TwitterSearchError::InvalidDate`] otherwise.
pub fn validate_partition_date(value: &str, context: &str) -> Result<String> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(|_| trimmed.to_string())
        .map_err(|_| TwitterSearchError::InvalidDate {
            value: value.to_string(),
            context: context.to_string(),
        })
}

/// Write records as bzip2-compressed NDJSON, returning the line count.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_ndjson_bz2<I>(records: I, path: &Path) -> Result<usize>
where
    I: IntoIterator<Item = Value>,
{
    let file = File::create(path).map_err(|e| TwitterSearchError::path_error("create", path, e))?;
    let mut encoder = BzEncoder::new(BufWriter::new(file), bzip2::Compression::default());
    let mut count = 0;
    for record in records {
        serde_json::to_writer(&mut encoder, &record)?;
        encoder.write_all(b"\n")?;
        count += 1;
    }
    encoder.finish()?.flush()?;
    Ok(count)
}

/// Uploads exports and repairs the matching warehouse tables.
pub struct Exporter<'a> {
    store: &'a dyn ObjectStore,
    warehouse: &'a dyn Warehouse,
    bucket: &'a str,
    work_dir: &'a Path,
}

impl<'a> Exporter<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn ObjectStore,
        warehouse: &'a dyn Warehouse,
        bucket: &'a str,
        work_dir: &'a Path,
    ) -> Self {
        Self {
            store,
            warehouse,
            bucket,
            work_dir,
        }
    }

    /// Export the tweets found for `kind`.
    ///
    /// Returns `None` without uploading when the table is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if reading, compressing, uploading or the
    /// partition repair fails.
    pub async fn export_tweets(
        &self,
        storage: &Storage,
        kind: KeyKind,
        backend: &str,
        reference_date: &str,
    ) -> Result<Option<ExportedTable>> {
        let table = format!("{backend}_{}", kind.table_suffix());
        let tweets = storage.tweet_records(kind)?;
        if tweets.is_empty() {
            warn!(table = %table, "No tweets collected, skipping export");
            return Ok(None);
        }

        let path = self.work_dir.join(format!("{table}.json.bz2"));
        let records = write_ndjson_bz2(tweets.into_iter().map(export_record), &path)?;

        let key = format!("{table}/reference_date={reference_date}/tweets.json.bz2");
        self.store.put_file(self.bucket, &key, &path).await?;
        self.warehouse.execute(&repair_table(&table)).await?;
        info!(table = %table, key = %key, records, "Exported tweets");

        Ok(Some(ExportedTable {
            table,
            key,
            records,
        }))
    }

    /// Publish today's newly discovered video IDs to the additions table,
    /// returning how many were registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the query, upload or partition repair fails.
    pub async fn register_new_videos(&self, creation_date: &str) -> Result<usize> {
        let csv_path = self.work_dir.join("new_videos_today.csv");
        self.warehouse.query_to_file(NEW_VIDEOS_TODAY, &csv_path).await?;
        let ids = read_column(&csv_path, "id")?;

        let gz_path = self.work_dir.join("new_videos.csv.gz");
        let videos = write_lines_gz(
            ids.iter().map(String::as_str).filter(|id| !id.trim().is_empty()),
            &gz_path,
        )?;

        let key = format!("{ADDITIONS_TABLE}/creation_date={creation_date}/video_ids.csv.gz");
        self.store.put_file(self.bucket, &key, &gz_path).await?;
        self.warehouse.execute(&repair_table(ADDITIONS_TABLE)).await?;
        info!(key = %key, videos, "Registered new videos");
        Ok(videos)
    }
}

/// Write one line per item, returning how many were written.
fn write_lines_gz<'s, I>(lines: I, path: &Path) -> Result<usize>
where
    I: IntoIterator<Item = &'s str>,
{
    let file = File::create(path).map_err(|e| TwitterSearchError::path_error("create", path, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), flate2::Compression::default());
    let mut written = 0;
    for line in lines {
        encoder.write_all(line.as_bytes())?;
        encoder.write_all(b"\n")?;
        written += 1;
    }
    encoder.finish()?.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::read::BzDecoder;
    use serde_json::json;
    use std::io::{BufRead, BufReader};

    #[test]
    fn normalizes_twitter_format() {
        assert_eq!(
            normalize_timestamp("Wed Oct 10 20:19:24 +0000 2018").as_deref(),
            Some("2018-10-10 20:19:24")
        );
        assert_eq!(
            normalize_timestamp("Wed Oct 10 22:19:24 +0200 2018").as_deref(),
            Some("2018-10-10 20:19:24")
        );
    }

    #[test]
    fn normalizes_rfc3339() {
        assert_eq!(
            normalize_timestamp("2018-10-10T20:19:24.000Z").as_deref(),
            Some("2018-10-10 20:19:24")
        );
        assert!(normalize_timestamp("yesterday").is_none());
    }

    #[test]
    fn normalizes_nested_fields() {
        let mut tweet = json!({
            "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            "user": {"created_at": "Mon Jan 02 03:04:05 +0000 2012"},
            "quoted": [{"createdAt": "2020-05-06T07:08:09Z"}],
            "text": "created_at stays",
            "other": {"created_at": "not a date"}
        });
        normalize_timestamps(&mut tweet);
        assert_eq!(tweet["created_at"], "2018-10-10 20:19:24");
        assert_eq!(tweet["user"]["created_at"], "2012-01-02 03:04:05");
        assert_eq!(tweet["quoted"][0]["createdAt"], "2020-05-06 07:08:09");
        assert_eq!(tweet["text"], "created_at stays");
        assert_eq!(tweet["other"]["created_at"], "not a date");
    }

    #[test]
    fn export_record_adds_search_query() {
        let record = export_record(StoredTweet {
            id_str: "1".to_string(),
            query: "(from:alice)".to_string(),
            screen_name: Some("alice".to_string()),
            tweet: json!({"id_str": "1", "created_at": "Wed Oct 10 20:19:24 +0000 2018"}),
        });
        assert_eq!(record["search_query"], "(from:alice)");
        assert_eq!(record["created_at"], "2018-10-10 20:19:24");
    }

    #[test]
    fn partition_date_validation() {
        assert_eq!(
            validate_partition_date(" 2024-03-01\n", "reference date").unwrap(),
            "2024-03-01"
        );
        assert!(matches!(
            validate_partition_date("03/01/2024", "reference date"),
            Err(TwitterSearchError::InvalidDate { .. })
        ));
    }

    #[test]
    fn ndjson_bz2_is_line_delimited() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.json.bz2");
        let count = write_ndjson_bz2(vec![json!({"a": 1}), json!({"a": 2})], &path).unwrap();
        assert_eq!(count, 2);

        let reader = BufReader::new(BzDecoder::new(File::open(&path).unwrap()));
        let lines: Vec<Value> = reader
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect();
        assert_eq!(lines, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn gz_lines_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ids.csv.gz");
        assert_eq!(write_lines_gz(["v1", "v2"], &path).unwrap(), 2);
        let mut text = String::new();
        std::io::Read::read_to_string(
            &mut flate2::read::GzDecoder::new(File::open(&path).unwrap()),
            &mut text,
        )
        .unwrap();
        assert_eq!(text, "v1\nv2\n");
    }
}
