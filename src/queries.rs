//! Warehouse SQL templates.
//!
//! These strings are the contract with the analytics engine; keep them
//! literal so they can be pasted into the Athena console when debugging.

/// Video IDs added to `youtube_twitter_addition` yesterday.
pub const NEW_VIDEOS_YESTERDAY: &str = "
select id
from
  youtube_twitter_addition
where
  creation_date = cast(current_date - interval '1' day as varchar)
";

/// Video IDs discovered today that are not yet in `youtube_twitter_addition`.
pub const NEW_VIDEOS_TODAY: &str = "
select distinct
  url_extract_parameter(validated_url, 'v') as id
from
  validated_url
where
  url_extract_host(validated_url) = 'www.youtube.com'
  and url_extract_parameter(validated_url, 'v') not in (select id from youtube_twitter_addition)
UNION DISTINCT
select distinct
  id.videoId as id
from
  youtube_related_video
where
  creation_date = cast(current_date as varchar)
  and id.videoId not in (select id from youtube_twitter_addition)
";

/// Yesterday's date as the warehouse sees it, `YYYY-MM-DD`.
pub const YESTERDAY: &str = "
select cast(current_date - interval '1' day as varchar) as reference_date
";

/// Table receiving the daily list of video IDs to search.
pub const ADDITIONS_TABLE: &str = "youtube_twitter_addition";

/// Comma-separated filter terms stored for the named filter.
#[must_use]
pub fn filter_terms_query(name: &str) -> String {
    format!(
        "
select track
from twitter_filter
where name='{}'
",
        name.replace('\'', "''")
    )
}

/// Re-register the partitions of `table` after new objects were uploaded.
#[must_use]
pub fn repair_table(table: &str) -> String {
    format!("MSCK REPAIR TABLE {table}")
}
