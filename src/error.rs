//! Custom error types for twitter-search.
//!
//! Provides structured error handling with enough context to tell which
//! collaborator failed (warehouse, object store, search backend, local
//! database) and with which query, key or HTTP status.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for twitter-search operations.
///
/// Every variant is retried the same way by the pipeline; the variants
/// exist for diagnostics, not for retry decisions.
#[derive(Error, Debug)]
pub enum TwitterSearchError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file could not be found at the given location.
    #[error("Configuration not found at '{location}'")]
    ConfigNotFound { location: String },

    /// Configuration file exists but could not be parsed.
    #[error("Invalid configuration in '{location}': {reason}")]
    ConfigError { location: String, reason: String },

    /// A setting required by the selected method is missing or empty.
    #[error("Missing required setting '{key}'")]
    MissingSetting { key: String },

    /// Malformed `s3://bucket/key` URL.
    #[error("Invalid S3 URL '{url}': expected s3://<bucket>/<key>")]
    InvalidS3Url { url: String },

    // =========================================================================
    // Warehouse Errors
    // =========================================================================
    /// The warehouse rejected or failed a request.
    #[error("Warehouse error: {reason}")]
    Warehouse { reason: String },

    /// A submitted query finished in a non-success state.
    #[error("Query {query_id} finished as {state}: {reason}")]
    QueryFailed {
        query_id: String,
        state: String,
        reason: String,
    },

    /// A submitted query did not finish within the allowed wait.
    #[error("Query {query_id} still unfinished after {waited_secs}s")]
    QueryTimedOut { query_id: String, waited_secs: u64 },

    /// A query returned no rows where at least one was required.
    #[error("Query for {what} returned no rows")]
    EmptyResult { what: String },

    // =========================================================================
    // Object Storage Errors
    // =========================================================================
    /// An object storage request failed.
    #[error("Failed to {operation} 's3://{bucket}/{key}': {reason}")]
    ObjectStore {
        operation: &'static str,
        bucket: String,
        key: String,
        reason: String,
    },

    // =========================================================================
    // Search Backend Errors
    // =========================================================================
    /// The search service answered with a non-success status.
    #[error("Search API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A hosted scraper run ended without succeeding.
    #[error("Scraper run {run_id} finished with status {status}")]
    RunFailed { run_id: String, status: String },

    /// Credentials were refused by the search service.
    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    // =========================================================================
    // Local Storage Errors
    // =========================================================================
    /// Scratch database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    // =========================================================================
    // IO and Encoding Errors
    // =========================================================================
    /// File read/write error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Path-specific IO error with context.
    #[error("Failed to {operation} '{path}': {source}")]
    PathError {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Warehouse CSV result could not be read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A date coming from the warehouse was not `YYYY-MM-DD`.
    #[error("Invalid date '{value}' in {context}")]
    InvalidDate { value: String, context: String },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for twitter-search operations.
pub type Result<T> = std::result::Result<T, TwitterSearchError>;

impl TwitterSearchError {
    /// Create a missing setting error.
    pub fn missing_setting(key: impl Into<String>) -> Self {
        Self::MissingSetting { key: key.into() }
    }

    /// Create a warehouse error.
    pub fn warehouse(reason: impl Into<String>) -> Self {
        Self::Warehouse {
            reason: reason.into(),
        }
    }

    /// Create an object storage error.
    pub fn object_store(
        operation: &'static str,
        bucket: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ObjectStore {
            operation,
            bucket: bucket.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a path error with context.
    pub fn path_error(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::PathError {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Get a suggestion for how to fix this error, if applicable.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ConfigNotFound { .. } => {
                Some("Pass --config with an s3://bucket/key URL or a readable local path.")
            }
            Self::MissingSetting { .. } => Some(
                "Add the setting to the config file or export the matching environment variable.",
            ),
            Self::Auth { .. } => {
                Some("Check [twitter] consumer_key/consumer_secret or bearer_token.")
            }
            Self::InvalidS3Url { .. } => Some("Use the form s3://bucket/path/to/object."),
            Self::QueryTimedOut { .. } => {
                Some("Raise aws.query-timeout-secs or check the Athena workgroup queue.")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TwitterSearchError::object_store("upload", "data", "a/b.json.bz2", "denied");
        let msg = err.to_string();
        assert!(msg.contains("s3://data/a/b.json.bz2"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_query_failed_display() {
        let err = TwitterSearchError::QueryFailed {
            query_id: "abc-123".to_string(),
            state: "FAILED".to_string(),
            reason: "SYNTAX_ERROR".to_string(),
        };
        assert_eq!(err.to_string(), "Query abc-123 finished as FAILED: SYNTAX_ERROR");
    }

    #[test]
    fn test_error_suggestions() {
        assert!(
            TwitterSearchError::missing_setting("aws.s3-data")
                .suggestion()
                .is_some()
        );
        assert!(TwitterSearchError::warehouse("boom").suggestion().is_none());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TwitterSearchError = io_err.into();
        assert!(matches!(err, TwitterSearchError::IoError(_)));
    }

    #[test]
    fn test_from_rusqlite_error() {
        fn accepts_error(_: TwitterSearchError) {}
        let sqlite_err = rusqlite::Error::InvalidQuery;
        accepts_error(sqlite_err.into());
    }

    #[test]
    fn test_from_toml_error() {
        let parse_err = toml::from_str::<toml::Value>("[aws").unwrap_err();
        let err: TwitterSearchError = parse_err.into();
        assert!(matches!(err, TwitterSearchError::ConfigError { .. }));
    }
}
