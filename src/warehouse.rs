//! Warehouse query layer.
//!
//! [`Warehouse`] runs SQL against the analytics engine and hands results
//! back as CSV, the engine's native result format. [`AthenaWarehouse`]
//! submits queries to Amazon Athena, polls until they finish, and reads
//! the result file Athena writes to the configured output bucket.

use crate::error::{Result, TwitterSearchError};
use crate::object_store::{ObjectStore, parse_s3_url};
use async_trait::async_trait;
use aws_sdk_athena::Client as AthenaClient;
use aws_sdk_athena::error::DisplayErrorContext;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One result row, keyed by column name.
pub type Row = HashMap<String, String>;

/// A finished query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExecution {
    pub query_id: String,
    /// `s3://` location of the result file, when the engine produced one.
    pub output_location: Option<String>,
}

/// SQL access to the analytics engine.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a statement and wait for it to finish.
    async fn execute(&self, sql: &str) -> Result<QueryExecution>;

    /// Run a query and return its result as CSV bytes with a header row.
    async fn fetch_csv(&self, sql: &str) -> Result<Vec<u8>>;

    /// Run a query and return its rows.
    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>> {
        let csv = self.fetch_csv(sql).await?;
        parse_csv_rows(&csv)
    }

    /// Run a query and save its CSV result to `path`.
    async fn query_to_file(&self, sql: &str, path: &Path) -> Result<PathBuf> {
        let csv = self.fetch_csv(sql).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TwitterSearchError::path_error("create directory", parent, e))?;
        }
        tokio::fs::write(path, &csv)
            .await
            .map_err(|e| TwitterSearchError::path_error("write", path, e))?;
        debug!(path = %path.display(), size = csv.len(), "Saved query result");
        Ok(path.to_path_buf())
    }
}

/// Parse CSV with a header row into rows keyed by column name.
///
/// # Errors
///
/// Returns an error if the CSV is malformed.
pub fn parse_csv_rows(data: &[u8]) -> Result<Vec<Row>> {
    let mut reader = csv::Reader::from_reader(data);
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect(),
        );
    }
    Ok(rows)
}

/// Read the values of `column` from a CSV result file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the column is missing.
pub fn read_column(path: &Path, column: &str) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)?;
    let index = reader
        .headers()?
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| {
            TwitterSearchError::warehouse(format!(
                "column '{column}' not found in {}",
                path.display()
            ))
        })?;
    let mut values = Vec::new();
    for record in reader.records() {
        if let Some(value) = record?.get(index) {
            values.push(value.to_string());
        }
    }
    Ok(values)
}

/// Default upper bound on waiting for one query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Amazon Athena backed [`Warehouse`].
pub struct AthenaWarehouse {
    client: AthenaClient,
    store: Arc<dyn ObjectStore>,
    database: String,
    output_location: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl AthenaWarehouse {
    /// Query `database`, writing results under `s3://<output_bucket>/athena/`.
    #[must_use]
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        store: Arc<dyn ObjectStore>,
        database: impl Into<String>,
        output_bucket: &str,
    ) -> Self {
        Self {
            client: AthenaClient::new(sdk_config),
            store,
            database: database.into(),
            output_location: format!("s3://{output_bucket}/athena/"),
            poll_interval: Duration::from_secs(1),
            max_wait: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Give up on a query, and ask Athena to stop it, after `max_wait`.
    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    async fn stop(&self, query_id: &str) {
        if let Err(e) = self
            .client
            .stop_query_execution()
            .query_execution_id(query_id)
            .send()
            .await
        {
            warn!(query_id, error = %DisplayErrorContext(&e), "Failed to stop query");
        }
    }

    async fn start(&self, sql: &str) -> Result<String> {
        let output = self
            .client
            .start_query_execution()
            .query_string(sql)
            .query_execution_context(
                QueryExecutionContext::builder()
                    .database(&self.database)
                    .build(),
            )
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(&self.output_location)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| TwitterSearchError::warehouse(DisplayErrorContext(&e).to_string()))?;

        output
            .query_execution_id()
            .map(str::to_string)
            .ok_or_else(|| TwitterSearchError::warehouse("no query execution id returned"))
    }

    async fn wait(&self, query_id: &str) -> Result<QueryExecution> {
        let started = tokio::time::Instant::now();
        loop {
            let output = self
                .client
                .get_query_execution()
                .query_execution_id(query_id)
                .send()
                .await
                .map_err(|e| TwitterSearchError::warehouse(DisplayErrorContext(&e).to_string()))?;

            let execution = output.query_execution();
            let status = execution.and_then(|e| e.status());
            match status.and_then(|s| s.state()) {
                Some(QueryExecutionState::Succeeded) => {
                    return Ok(QueryExecution {
                        query_id: query_id.to_string(),
                        output_location: execution
                            .and_then(|e| e.result_configuration())
                            .and_then(|c| c.output_location())
                            .map(str::to_string),
                    });
                }
                Some(state @ (QueryExecutionState::Failed | QueryExecutionState::Cancelled)) => {
                    return Err(TwitterSearchError::QueryFailed {
                        query_id: query_id.to_string(),
                        state: state.as_str().to_string(),
                        reason: status
                            .and_then(|s| s.state_change_reason())
                            .unwrap_or("no reason given")
                            .to_string(),
                    });
                }
                _ => {
                    let waited = started.elapsed();
                    if waited >= self.max_wait {
                        self.stop(query_id).await;
                        return Err(TwitterSearchError::QueryTimedOut {
                            query_id: query_id.to_string(),
                            waited_secs: waited.as_secs(),
                        });
                    }
                    debug!(query_id, "Query still running");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl Warehouse for AthenaWarehouse {
    async fn execute(&self, sql: &str) -> Result<QueryExecution> {
        let query_id = self.start(sql).await?;
        info!(query_id = %query_id, database = %self.database, "Submitted query");
        let execution = self.wait(&query_id).await?;
        info!(query_id = %query_id, "Query succeeded");
        Ok(execution)
    }

    async fn fetch_csv(&self, sql: &str) -> Result<Vec<u8>> {
        let execution = self.execute(sql).await?;
        let location = execution.output_location.ok_or_else(|| {
            TwitterSearchError::warehouse(format!(
                "query {} produced no result file",
                execution.query_id
            ))
        })?;
        let (bucket, key) = parse_s3_url(&location)?;
        self.store.get_bytes(&bucket, &key).await
    }
}
