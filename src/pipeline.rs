//! The daily search run.
//!
//! Phases, in order:
//!
//! 1. look up the filter terms and the reference date in the warehouse
//! 2. seed yesterday's new video IDs into the scratch database
//! 3. search video IDs, promote the authors found, search their names
//! 4. export both tweet tables and repair their partitions
//! 5. optionally publish today's new video IDs for tomorrow's run
//!
//! Collection resumes from the scratch database after a failure, so keys
//! claimed before the failure are not searched again.

use crate::backend::SearchBackend;
use crate::error::{Result, TwitterSearchError};
use crate::export::{Exporter, validate_partition_date};
use crate::logging::OperationGuard;
use crate::model::{ExportedTable, KeyKind, RunSummary};
use crate::object_store::ObjectStore;
use crate::queries::{NEW_VIDEOS_YESTERDAY, YESTERDAY, filter_terms_query};
use crate::query::{MAX_TERMS_PER_QUERY, build_query, is_valid_key};
use crate::retry::with_retries;
use crate::storage::Storage;
use crate::warehouse::{Warehouse, read_column};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Name of the `twitter_filter` row to exclude.
    pub filter: String,
    /// Bucket receiving exported data.
    pub data_bucket: String,
    /// Scratch directory for the database and intermediate files.
    pub work_dir: PathBuf,
    /// Retries of a failed search call.
    pub max_retries: u32,
    /// Consecutive collection failures tolerated.
    pub resume_tolerance: u32,
    /// Publish today's new video IDs after exporting.
    pub register_additions: bool,
    /// Start of the run; dates the additions partition.
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    video_batches: usize,
    screen_name_batches: usize,
}

impl Progress {
    const fn total(self) -> usize {
        self.video_batches + self.screen_name_batches
    }

    fn record(&mut self, kind: KeyKind) {
        match kind {
            KeyKind::VideoId => self.video_batches += 1,
            KeyKind::ScreenName => self.screen_name_batches += 1,
        }
    }
}

/// Runs the search pipeline against its collaborators.
pub struct TwitterSearch {
    warehouse: Arc<dyn Warehouse>,
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn SearchBackend>,
    storage: Storage,
    settings: RunSettings,
}

impl TwitterSearch {
    /// Prepare a run, recreating the scratch database in the work directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the work directory or database cannot be set up.
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn SearchBackend>,
        settings: RunSettings,
    ) -> Result<Self> {
        std::fs::create_dir_all(&settings.work_dir).map_err(|e| {
            TwitterSearchError::path_error("create directory", &settings.work_dir, e)
        })?;
        let db_path = settings.work_dir.join(crate::DEFAULT_DB_NAME);
        remove_database(&db_path)?;
        let storage = Storage::open(&db_path)?;
        Ok(Self {
            warehouse,
            store,
            backend,
            storage,
            settings,
        })
    }

    /// Scratch database of this run.
    #[must_use]
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Execute every phase and summarize the run.
    ///
    /// # Errors
    ///
    /// Returns the first unrecovered error.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let filter_terms = self.filter_terms().await?;
        let reference_date = self.reference_date().await?;
        info!(
            backend = self.backend.name(),
            reference_date = %reference_date,
            "Starting twitter search"
        );

        let guard = OperationGuard::new("seed video ids");
        guard.finish(self.seed_new_videos().await)?;

        let guard = OperationGuard::new("collect tweets");
        let (progress, resumes) = guard.finish(self.collect_with_resume(&filter_terms).await)?;

        let guard = OperationGuard::new("export tweets");
        let exported = guard.finish(self.export(&reference_date).await)?;

        let additions_registered = if self.settings.register_additions {
            let guard = OperationGuard::new("register new videos");
            let creation_date = self.settings.started_at.format("%Y-%m-%d").to_string();
            let exporter = self.exporter();
            Some(guard.finish(exporter.register_new_videos(&creation_date).await)?)
        } else {
            None
        };

        Ok(RunSummary {
            backend: self.backend.name().to_string(),
            reference_date,
            video_batches: progress.video_batches,
            screen_name_batches: progress.screen_name_batches,
            resumes,
            counts: self.storage.counts()?,
            exported,
            additions_registered,
        })
    }

    async fn filter_terms(&self) -> Result<String> {
        let rows = self
            .warehouse
            .query_rows(&filter_terms_query(&self.settings.filter))
            .await?;
        let track = rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("track"))
            .ok_or_else(|| TwitterSearchError::EmptyResult {
                what: format!("filter '{}'", self.settings.filter),
            })?;
        info!(filter = %self.settings.filter, terms = %track, "Loaded filter terms");
        Ok(track)
    }

    async fn reference_date(&self) -> Result<String> {
        let rows = self.warehouse.query_rows(YESTERDAY).await?;
        let value = rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("reference_date"))
            .ok_or_else(|| TwitterSearchError::EmptyResult {
                what: "reference date".to_string(),
            })?;
        validate_partition_date(&value, "reference date")
    }

    async fn seed_new_videos(&mut self) -> Result<usize> {
        let path = self.settings.work_dir.join("new_videos_yesterday.csv");
        self.warehouse.query_to_file(NEW_VIDEOS_YESTERDAY, &path).await?;
        let ids = read_column(&path, "id")?;
        self.storage.seed_keys(KeyKind::VideoId, &ids)
    }

    /// Collect until done, restarting after failures from the local state.
    async fn collect_with_resume(&mut self, filter_terms: &str) -> Result<(Progress, usize)> {
        let mut progress = Progress::default();
        let mut failures = 0u32;
        let mut resumes = 0usize;

        loop {
            let before = progress.total();
            match self.collect(filter_terms, &mut progress).await {
                Ok(()) => return Ok((progress, resumes)),
                Err(e) => {
                    if progress.total() > before {
                        failures = 0;
                    }
                    failures += 1;
                    if failures > self.settings.resume_tolerance {
                        return Err(e);
                    }
                    resumes += 1;
                    warn!(
                        attempt = failures,
                        tolerance = self.settings.resume_tolerance,
                        error = %e,
                        "Collection failed, resuming from local state"
                    );
                }
            }
        }
    }

    async fn collect(&mut self, filter_terms: &str, progress: &mut Progress) -> Result<()> {
        self.drain(KeyKind::VideoId, filter_terms, progress).await?;
        self.storage.promote_authors()?;
        self.drain(KeyKind::ScreenName, filter_terms, progress).await
    }

    /// Search batches of `kind` until no unprocessed key is left.
    async fn drain(
        &mut self,
        kind: KeyKind,
        filter_terms: &str,
        progress: &mut Progress,
    ) -> Result<()> {
        loop {
            let claimed = self.storage.claim_batch(kind, MAX_TERMS_PER_QUERY)?;
            if claimed.is_empty() {
                return Ok(());
            }

            let (keys, invalid): (Vec<String>, Vec<String>) =
                claimed.into_iter().partition(|key| is_valid_key(kind, key));
            for key in &invalid {
                warn!(kind = %kind, key = %key, "Skipping key that cannot be searched");
            }
            let Some(query) = build_query(kind, &keys, filter_terms) else {
                continue;
            };

            info!(kind = %kind, query = %query, "Searching");
            let backend = self.backend.as_ref();
            let tweets = with_retries("search", self.settings.max_retries, || {
                backend.search(&query)
            })
            .await?;
            self.storage.store_tweets(kind, &query, &tweets)?;
            progress.record(kind);
        }
    }

    async fn export(&self, reference_date: &str) -> Result<Vec<ExportedTable>> {
        let exporter = self.exporter();
        let mut exported = Vec::new();
        for kind in KeyKind::ALL {
            if let Some(table) = exporter
                .export_tweets(&self.storage, kind, self.backend.name(), reference_date)
                .await?
            {
                exported.push(table);
            }
        }
        Ok(exported)
    }

    fn exporter(&self) -> Exporter<'_> {
        Exporter::new(
            self.store.as_ref(),
            self.warehouse.as_ref(),
            &self.settings.data_bucket,
            &self.settings.work_dir,
        )
    }
}

/// Remove a previous run's database along with its WAL side files.
fn remove_database(db_path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_owned();
        name.push(suffix);
        let path = PathBuf::from(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TwitterSearchError::path_error("remove", path, e)),
        }
    }
    Ok(())
}
