use crate::archive::{self, Archive};
use crate::fetch::{FetchError, FetchOutcome, Fetcher};
use crate::links::{dedup, extract_links};
use crate::{logi, logok, logw};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

pub const DEFAULT_MAX_ITEMS: usize = 50;
pub const DEFAULT_ARCHIVE_NAME: &str = "reels.zip";

/// Batch-level failures. Per-item failures never show up here; they are
/// recorded in the item's [`FetchOutcome`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("no supported video links found in the input")]
    ExtractionEmpty,
    #[error("max_items must be a positive integer")]
    InvalidMaxItems,
}

/// Everything one batch run needs from its caller.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub raw_text: String,
    pub max_items: usize,
    pub build_archive: bool,
    pub archive_name: String,
    /// Number of fetches allowed in flight at once; 1 runs strictly in order.
    pub jobs: usize,
}

impl BatchRequest {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            max_items: DEFAULT_MAX_ITEMS,
            build_archive: true,
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            jobs: 1,
        }
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn build_archive(mut self, build_archive: bool) -> Self {
        self.build_archive = build_archive;
        self
    }

    pub fn archive_name(mut self, name: impl Into<String>) -> Self {
        self.archive_name = name.into();
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }
}

/// Cooperative cancellation shared between the caller and a running batch.
/// Checked before each item starts; an item already in flight finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum ArchiveStatus {
    NotRequested,
    /// Requested, but no item succeeded.
    NoSuccesses,
    Built(Archive),
    /// Archive construction failed; individual artifacts are still usable.
    Failed(String),
}

#[derive(Debug)]
pub struct BatchResult {
    outcomes: Vec<FetchOutcome>,
    archive: ArchiveStatus,
    download_names: Vec<Option<String>>,
    cancelled: bool,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl BatchResult {
    /// Outcomes in deduplicated-candidate order.
    pub fn outcomes(&self) -> &[FetchOutcome] {
        &self.outcomes
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    pub fn archive(&self) -> &ArchiveStatus {
        &self.archive
    }

    /// Collision-free file name for each outcome (`None` for failures); the
    /// same names are used inside the archive.
    pub fn download_names(&self) -> &[Option<String>] {
        &self.download_names
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn into_outcomes(self) -> Vec<FetchOutcome> {
        self.outcomes
    }
}

/// Runs one batch: extract, dedup, cap, fetch each item in isolation, then
/// package the successes.
pub async fn run_batch(
    fetcher: &Fetcher,
    request: &BatchRequest,
    cancel: &CancelFlag,
) -> Result<BatchResult, BatchError> {
    if request.max_items == 0 {
        return Err(BatchError::InvalidMaxItems);
    }

    let started_at = Utc::now();
    let extracted = extract_links(&request.raw_text);
    let found = extracted.len();
    let mut candidates = dedup(extracted);
    if candidates.is_empty() {
        return Err(BatchError::ExtractionEmpty);
    }
    let unique = candidates.len();
    candidates.truncate(request.max_items);
    let total = candidates.len();

    logi(format!(
        "Found {} link(s), {} unique; processing {}",
        found, unique, total
    ));

    let jobs = request.jobs.max(1);
    let outcomes: Vec<FetchOutcome> = futures::stream::iter(candidates.into_iter().enumerate())
        .map(|(idx, candidate)| async move {
            if cancel.is_cancelled() {
                return FetchOutcome::failure(candidate, FetchError::Cancelled);
            }
            logi(format!("[{}/{}] Fetching {}", idx + 1, total, candidate));
            let outcome = fetcher.fetch_one(candidate).await;
            match (outcome.artifact(), outcome.reason()) {
                (Some(artifact), _) => logok(format!(
                    "[{}/{}] {} ({} bytes)",
                    idx + 1,
                    total,
                    artifact.file_name(),
                    artifact.size()
                )),
                (None, Some(reason)) => logw(format!("[{}/{}] {}", idx + 1, total, reason)),
                (None, None) => {}
            }
            outcome
        })
        .buffered(jobs)
        .collect()
        .await;

    let cancelled = outcomes
        .iter()
        .any(|o| o.error() == Some(&FetchError::Cancelled));

    let names = archive::unique_names(
        outcomes
            .iter()
            .filter_map(|o| o.artifact())
            .map(|a| a.title().to_string()),
    );
    let mut names = names.into_iter();
    let download_names: Vec<Option<String>> = outcomes
        .iter()
        .map(|o| {
            let artifact = o.artifact()?;
            let stem = names.next()?;
            Some(format!("{}.{}", stem, artifact.extension()))
        })
        .collect();

    let archive = if !request.build_archive {
        ArchiveStatus::NotRequested
    } else {
        let sources: Vec<(String, PathBuf)> = outcomes
            .iter()
            .zip(&download_names)
            .filter_map(|(o, name)| Some((name.clone()?, o.artifact()?.path().to_path_buf())))
            .collect();
        if sources.is_empty() {
            ArchiveStatus::NoSuccesses
        } else {
            match archive::build_archive_file(&request.archive_name, sources, fetcher.scratch_dir())
                .await
            {
                Ok(built) => {
                    logok(format!(
                        "Archive {} built ({} entries, {} bytes)",
                        built.file_name(),
                        built.entries().len(),
                        built.size()
                    ));
                    ArchiveStatus::Built(built)
                }
                Err(err) => {
                    logw(format!("Archive build failed: {}", err));
                    ArchiveStatus::Failed(err.to_string())
                }
            }
        }
    };

    let result = BatchResult {
        outcomes,
        archive,
        download_names,
        cancelled,
        started_at,
        finished_at: Utc::now(),
    };
    logi(format!(
        "Batch done: {} succeeded, {} failed{}",
        result.success_count(),
        result.failure_count(),
        if result.cancelled { " (cancelled)" } else { "" }
    ));
    Ok(result)
}
