//! Search query construction.
//!
//! Keys are OR-ed together in groups of at most [`MAX_TERMS_PER_QUERY`]
//! so the resulting string stays under the search provider's query-length
//! limit. Filter terms become exclusions appended to every query.

use crate::model::KeyKind;
use itertools::Itertools;
use regex::Regex;
use std::sync::LazyLock;

/// Maximum number of keys OR-ed into one search query.
pub const MAX_TERMS_PER_QUERY: usize = 5;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static SCREEN_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").unwrap());

/// Whether `key` can be placed in a query for `kind` without changing its meaning.
#[must_use]
pub fn is_valid_key(kind: KeyKind, key: &str) -> bool {
    match kind {
        KeyKind::VideoId => VIDEO_ID_RE.is_match(key),
        KeyKind::ScreenName => SCREEN_NAME_RE.is_match(key),
    }
}

/// Render the comma-separated `track` value of a filter as exclusions.
///
/// `"spam, ads,,two words"` becomes `-spam -ads -"two words"`.
#[must_use]
pub fn exclusions(filter_terms: &str) -> String {
    filter_terms
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            if term.contains(char::is_whitespace) {
                format!("-\"{}\"", term.replace('"', ""))
            } else {
                format!("-{term}")
            }
        })
        .join(" ")
}

/// Build the search query for one batch of keys.
///
/// Returns `None` for an empty batch, which ends the batching loop.
#[must_use]
pub fn build_query(kind: KeyKind, keys: &[String], filter_terms: &str) -> Option<String> {
    if keys.is_empty() {
        return None;
    }
    debug_assert!(keys.len() <= MAX_TERMS_PER_QUERY);

    let alternatives = match kind {
        KeyKind::VideoId => keys.iter().map(|id| format!("{WATCH_URL}{id}")).join(" OR "),
        KeyKind::ScreenName => keys.iter().map(|name| format!("from:{name}")).join(" OR "),
    };
    let exclusions = exclusions(filter_terms);

    let mut parts = vec![format!("({alternatives})")];
    if kind == KeyKind::ScreenName {
        parts.push("(youtu.be OR youtube)".to_string());
    }
    if !exclusions.is_empty() {
        parts.push(exclusions);
    }
    if kind == KeyKind::ScreenName {
        parts.push("filter:links".to_string());
    }
    Some(parts.join(" "))
}
