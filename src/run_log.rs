//! Run bookkeeping.
//!
//! The JSON log written during a run is uploaded to the admin bucket when
//! the run ends, whatever its outcome, and the warehouse `log` table is
//! recreated over the whole log prefix so the new file is queryable.

use crate::APP_NAME;
use crate::error::Result;
use crate::object_store::ObjectStore;
use crate::queries::repair_table;
use crate::warehouse::Warehouse;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const LOG_TABLE: &str = "log";

/// The log file of one run and where it is published.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    started_at: DateTime<Utc>,
}

impl RunLog {
    /// A run log under `<work_dir>/logs/`, named after the start instant.
    #[must_use]
    pub fn new(work_dir: &Path, started_at: DateTime<Utc>) -> Self {
        let path = work_dir
            .join("logs")
            .join(format!("{}.json", started_at.format("%Y%m%dT%H%M%SZ")));
        Self { path, started_at }
    }

    /// Local path the logging layer writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Object key of the uploaded log inside the admin bucket.
    #[must_use]
    pub fn object_key(&self) -> String {
        format!(
            "{LOG_TABLE}/app_name={APP_NAME}/creation_date={}/{}.json",
            self.started_at.format("%Y-%m-%d"),
            self.started_at.format("%Y%m%dT%H%M%SZ")
        )
    }

    /// Upload the log and recreate the warehouse log table.
    ///
    /// # Errors
    ///
    /// Returns the first failing upload or statement.
    pub async fn finalize(
        &self,
        store: &dyn ObjectStore,
        warehouse: &dyn Warehouse,
        admin_bucket: &str,
    ) -> Result<()> {
        let key = self.object_key();
        if self.path.exists() {
            store.put_file(admin_bucket, &key, &self.path).await?;
        } else {
            warn!(path = %self.path.display(), "Run log file missing, uploading empty log");
            store.put_bytes(admin_bucket, &key, Vec::new()).await?;
        }

        for statement in log_table_statements(admin_bucket) {
            warehouse.execute(&statement).await?;
        }
        info!(bucket = admin_bucket, key = %key, "Published run log");
        Ok(())
    }
}

/// Statements recreating the `log` table over `s3://<bucket>/log/`.
#[must_use]
pub fn log_table_statements(admin_bucket: &str) -> [String; 3] {
    [
        format!("DROP TABLE IF EXISTS {LOG_TABLE}"),
        format!(
            "CREATE EXTERNAL TABLE IF NOT EXISTS {LOG_TABLE} (
  `timestamp` string,
  level string,
  target string,
  fields struct<message:string>
)
PARTITIONED BY (app_name string, creation_date string)
ROW FORMAT SERDE 'org.openx.data.jsonserde.JsonSerDe'
WITH SERDEPROPERTIES ('ignore.malformed.json' = 'true')
LOCATION 's3://{admin_bucket}/{LOG_TABLE}/'"
        ),
        repair_table(LOG_TABLE),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 4, 5, 6).single().unwrap()
    }

    #[test]
    fn log_paths() {
        let log = RunLog::new(Path::new("/work"), started());
        assert_eq!(log.path(), Path::new("/work/logs/20240302T040506Z.json"));
        assert_eq!(
            log.object_key(),
            "log/app_name=twitter-search/creation_date=2024-03-02/20240302T040506Z.json"
        );
    }

    #[test]
    fn table_statements() {
        let [drop, create, repair] = log_table_statements("admin-bucket");
        assert_eq!(drop, "DROP TABLE IF EXISTS log");
        assert!(create.contains("LOCATION 's3://admin-bucket/log/'"));
        assert!(create.contains("PARTITIONED BY (app_name string, creation_date string)"));
        assert_eq!(repair, "MSCK REPAIR TABLE log");
    }
}
