use crate::config::Config;
use crate::links::LinkCandidate;
use crate::logw;
use crate::media;
use crate::retrieval::Retriever;
use crate::sanitize::sanitize_title;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

const SCRATCH_PREFIX: &str = "reel-batch-item-";
const DEFAULT_EXTENSION: &str = "mp4";

/// Why a single item could not be fetched. Every variant renders a non-empty
/// message suitable for showing next to the item.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("metadata resolution failed: {0}")]
    Metadata(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("cancelled before the download started")]
    Cancelled,
    #[error("internal error while fetching: {0}")]
    Panicked(String),
}

fn detail(message: impl ToString) -> String {
    let message = message.to_string();
    if message.trim().is_empty() {
        "unknown error".to_string()
    } else {
        message
    }
}

/// Format selectors for transfers: the primary one, then at most one named
/// alternate if the primary transfer fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPolicy {
    pub primary: String,
    pub alternate: Option<String>,
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self {
            primary: "best[ext=mp4]".to_string(),
            alternate: Some("best".to_string()),
        }
    }
}

/// A downloaded video held in storage private to its item. The storage is
/// removed when the artifact is dropped.
#[derive(Debug)]
pub struct Artifact {
    title: String,
    extension: String,
    duration_seconds: u64,
    size: u64,
    path: PathBuf,
    _storage: TempDir,
}

impl Artifact {
    /// Sanitized title, used as the file stem.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.title, self.extension)
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        fs::read(&self.path).await
    }

    /// Copies the artifact to `dir/file_name`, creating `dir` if needed.
    pub async fn persist_to(&self, dir: &Path, file_name: &str) -> std::io::Result<PathBuf> {
        fs::create_dir_all(dir).await?;
        let dest = dir.join(file_name);
        fs::copy(&self.path, &dest).await?;
        Ok(dest)
    }
}

#[derive(Debug)]
pub enum FetchStatus {
    Success(Artifact),
    Failure(FetchError),
}

/// Terminal record of one candidate's fetch attempt.
#[derive(Debug)]
pub struct FetchOutcome {
    candidate: LinkCandidate,
    status: FetchStatus,
}

impl FetchOutcome {
    pub fn success(candidate: LinkCandidate, artifact: Artifact) -> Self {
        Self {
            candidate,
            status: FetchStatus::Success(artifact),
        }
    }

    pub fn failure(candidate: LinkCandidate, error: FetchError) -> Self {
        Self {
            candidate,
            status: FetchStatus::Failure(error),
        }
    }

    pub fn candidate(&self) -> &LinkCandidate {
        &self.candidate
    }

    pub fn status(&self) -> &FetchStatus {
        &self.status
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, FetchStatus::Success(_))
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match &self.status {
            FetchStatus::Success(artifact) => Some(artifact),
            FetchStatus::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match &self.status {
            FetchStatus::Success(_) => None,
            FetchStatus::Failure(err) => Some(err),
        }
    }

    pub fn reason(&self) -> Option<String> {
        self.error().map(ToString::to_string)
    }

    pub fn into_parts(self) -> (LinkCandidate, FetchStatus) {
        (self.candidate, self.status)
    }
}

/// Fetches single candidates through a [`Retriever`], isolating every failure.
#[derive(Clone)]
pub struct Fetcher {
    retriever: Arc<dyn Retriever>,
    formats: FormatPolicy,
    ffprobe: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
}

impl Fetcher {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self {
            retriever,
            formats: FormatPolicy::default(),
            ffprobe: None,
            scratch_dir: None,
        }
    }

    pub fn from_config(retriever: Arc<dyn Retriever>, cfg: &Config) -> Self {
        Self {
            retriever,
            formats: FormatPolicy {
                primary: cfg.primary_format.clone(),
                alternate: cfg.alternate_format.clone(),
            },
            ffprobe: cfg.probe_duration.then(|| cfg.ffprobe_path.clone()),
            scratch_dir: None,
        }
    }

    pub fn with_formats(mut self, formats: FormatPolicy) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_ffprobe(mut self, ffprobe: Option<PathBuf>) -> Self {
        self.ffprobe = ffprobe;
        self
    }

    /// Parent directory for per-item scratch storage; the system temp dir
    /// when unset.
    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }

    /// Fetches one candidate. Never returns an error and never panics past
    /// this boundary: every failure becomes a `Failure` outcome, and scratch
    /// storage of a failed item is removed before returning.
    pub async fn fetch_one(&self, candidate: LinkCandidate) -> FetchOutcome {
        let attempt = AssertUnwindSafe(self.try_fetch(&candidate)).catch_unwind().await;
        match attempt {
            Ok(Ok(artifact)) => FetchOutcome::success(candidate, artifact),
            Ok(Err(err)) => FetchOutcome::failure(candidate, err),
            Err(payload) => FetchOutcome::failure(candidate, FetchError::Panicked(panic_message(payload))),
        }
    }

    async fn try_fetch(&self, candidate: &LinkCandidate) -> Result<Artifact, FetchError> {
        let url = candidate.canonical();

        let meta = self
            .retriever
            .resolve_metadata(url)
            .await
            .map_err(|err| FetchError::Metadata(detail(err)))?;

        let title = sanitize_title(&meta.title);
        let storage = self.scratch()?;
        let path = self.transfer_with_fallback(url, storage.path()).await?;

        let size = fs::metadata(&path)
            .await
            .map_err(|err| FetchError::Storage(detail(format!("{}: {err}", path.display()))))?
            .len();
        if size == 0 {
            return Err(FetchError::Transfer("extractor produced an empty file".to_string()));
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric()))
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

        let mut duration_seconds = meta.duration_seconds;
        if duration_seconds == 0 {
            if let Some(ffprobe) = &self.ffprobe {
                match media::ffprobe_duration_seconds(ffprobe, &path).await {
                    Ok(secs) => duration_seconds = secs.trunc() as u64,
                    Err(err) => debug!("duration probe failed for {url}: {err}"),
                }
            }
        }

        Ok(Artifact {
            title,
            extension,
            duration_seconds,
            size,
            path,
            _storage: storage,
        })
    }

    fn scratch(&self) -> Result<TempDir, FetchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match &self.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.map_err(|err| FetchError::Storage(detail(format!("scratch directory: {err}"))))
    }

    async fn transfer_with_fallback(&self, url: &str, dest: &Path) -> Result<PathBuf, FetchError> {
        let primary = &self.formats.primary;
        let first = match self.retriever.transfer(url, dest, primary).await {
            Ok(path) => return Ok(path),
            Err(err) => err,
        };

        let Some(alternate) = &self.formats.alternate else {
            return Err(FetchError::Transfer(detail(first)));
        };

        logw(format!(
            "Format '{}' failed for {} ({}); retrying with '{}'",
            primary, url, first, alternate
        ));
        clear_directory_contents(dest).await;

        self.retriever
            .transfer(url, dest, alternate)
            .await
            .map_err(|second| {
                FetchError::Transfer(detail(format!(
                    "format '{primary}': {first}; format '{alternate}': {second}"
                )))
            })
    }
}

async fn clear_directory_contents(dir_path: &Path) {
    for entry in WalkDir::new(dir_path).min_depth(1).contents_first(true) {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        if entry.file_type().is_dir() {
            fs::remove_dir(path).await.ok();
        } else {
            fs::remove_file(path).await.ok();
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "fetch task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{RetrievalError, VideoMetadata};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedRetriever {
        title: String,
        duration: u64,
        fail_metadata: bool,
        failing_formats: Vec<String>,
        panic_on_metadata: bool,
        seen_formats: Mutex<Vec<String>>,
        leave_partial: bool,
    }

    #[async_trait]
    impl Retriever for ScriptedRetriever {
        async fn resolve_metadata(&self, url: &str) -> Result<VideoMetadata, RetrievalError> {
            if self.panic_on_metadata {
                panic!("boom");
            }
            if self.fail_metadata {
                return Err(RetrievalError::Forbidden(format!("{url} needs login")));
            }
            Ok(VideoMetadata {
                title: self.title.clone(),
                duration_seconds: self.duration,
            })
        }

        async fn transfer(
            &self,
            _url: &str,
            destination: &Path,
            format: &str,
        ) -> Result<PathBuf, RetrievalError> {
            self.seen_formats.lock().unwrap().push(format.to_string());
            if self.failing_formats.iter().any(|f| f == format) {
                if self.leave_partial {
                    std::fs::write(destination.join("partial.mp4.part"), b"half").unwrap();
                }
                return Err(RetrievalError::Transfer(format!("{format} unavailable")));
            }
            let entries = std::fs::read_dir(destination).unwrap().count();
            assert_eq!(entries, 0, "scratch dir must be empty before a transfer");
            let path = destination.join("clip.MP4");
            std::fs::write(&path, b"video-bytes").unwrap();
            Ok(path)
        }
    }

    fn candidate(id: u32) -> LinkCandidate {
        LinkCandidate::parse(&format!("https://www.facebook.com/reel/{id}/")).unwrap()
    }

    fn fetcher(retriever: ScriptedRetriever, scratch: &Path) -> (Fetcher, Arc<ScriptedRetriever>) {
        let retriever = Arc::new(retriever);
        let fetcher = Fetcher::new(retriever.clone()).with_scratch_dir(Some(scratch.to_path_buf()));
        (fetcher, retriever)
    }

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn success_carries_sanitized_title_and_bytes() {
        let scratch = tempfile::tempdir().unwrap();
        let (fetcher, _) = fetcher(
            ScriptedRetriever {
                title: "Cat jumps! (funny)".to_string(),
                duration: 31,
                ..Default::default()
            },
            scratch.path(),
        );

        let outcome = fetcher.fetch_one(candidate(1)).await;
        assert!(outcome.is_success());
        let artifact = outcome.artifact().unwrap();
        assert_eq!(artifact.title(), "Cat_jumps_funny");
        assert_eq!(artifact.file_name(), "Cat_jumps_funny.mp4");
        assert_eq!(artifact.duration_seconds(), 31);
        assert_eq!(artifact.size(), 11);
        assert_eq!(artifact.read_bytes().await.unwrap(), b"video-bytes");

        assert_eq!(scratch_entries(scratch.path()), 1);
        drop(outcome);
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn metadata_failure_is_captured_with_reason() {
        let scratch = tempfile::tempdir().unwrap();
        let (fetcher, retriever) = fetcher(
            ScriptedRetriever {
                fail_metadata: true,
                ..Default::default()
            },
            scratch.path(),
        );

        let outcome = fetcher.fetch_one(candidate(2)).await;
        assert!(!outcome.is_success());
        let reason = outcome.reason().unwrap();
        assert!(reason.starts_with("metadata resolution failed: "), "{reason}");
        assert!(retriever.seen_formats.lock().unwrap().is_empty());
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn falls_back_to_alternate_format_once() {
        let scratch = tempfile::tempdir().unwrap();
        let (fetcher, retriever) = fetcher(
            ScriptedRetriever {
                title: "x".to_string(),
                failing_formats: vec!["best[ext=mp4]".to_string()],
                leave_partial: true,
                ..Default::default()
            },
            scratch.path(),
        );

        let outcome = fetcher.fetch_one(candidate(3)).await;
        assert!(outcome.is_success(), "{:?}", outcome.reason());
        assert_eq!(
            *retriever.seen_formats.lock().unwrap(),
            vec!["best[ext=mp4]".to_string(), "best".to_string()]
        );
    }

    #[tokio::test]
    async fn transfer_failure_cleans_scratch_storage() {
        let scratch = tempfile::tempdir().unwrap();
        let (fetcher, retriever) = fetcher(
            ScriptedRetriever {
                title: "x".to_string(),
                failing_formats: vec!["best[ext=mp4]".to_string(), "best".to_string()],
                leave_partial: true,
                ..Default::default()
            },
            scratch.path(),
        );

        let outcome = fetcher.fetch_one(candidate(4)).await;
        let reason = outcome.reason().unwrap();
        assert!(reason.starts_with("transfer failed: "), "{reason}");
        assert!(reason.contains("best[ext=mp4]") && reason.contains("'best'"), "{reason}");
        assert_eq!(retriever.seen_formats.lock().unwrap().len(), 2);
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn no_alternate_means_single_attempt() {
        let scratch = tempfile::tempdir().unwrap();
        let (fetcher, retriever) = fetcher(
            ScriptedRetriever {
                failing_formats: vec!["only".to_string()],
                ..Default::default()
            },
            scratch.path(),
        );
        let fetcher = fetcher.with_formats(FormatPolicy {
            primary: "only".to_string(),
            alternate: None,
        });

        let outcome = fetcher.fetch_one(candidate(5)).await;
        assert_eq!(outcome.error(), Some(&FetchError::Transfer("only unavailable".to_string())));
        assert_eq!(retriever.seen_formats.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn panicking_retriever_becomes_a_failure() {
        let scratch = tempfile::tempdir().unwrap();
        let (fetcher, _) = fetcher(
            ScriptedRetriever {
                panic_on_metadata: true,
                ..Default::default()
            },
            scratch.path(),
        );

        let outcome = fetcher.fetch_one(candidate(6)).await;
        assert_eq!(outcome.error(), Some(&FetchError::Panicked("boom".to_string())));
    }

    #[tokio::test]
    async fn empty_title_and_unknown_duration() {
        let scratch = tempfile::tempdir().unwrap();
        let (fetcher, _) = fetcher(ScriptedRetriever::default(), scratch.path());
        let fetcher = fetcher.with_ffprobe(Some(PathBuf::from("/nonexistent/ffprobe")));

        let outcome = fetcher.fetch_one(candidate(7)).await;
        let artifact = outcome.artifact().unwrap();
        assert_eq!(artifact.title(), "video");
        assert_eq!(artifact.duration_seconds(), 0);
    }

    #[tokio::test]
    async fn persist_copies_to_destination() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let (fetcher, _) = fetcher(
            ScriptedRetriever {
                title: "clip".to_string(),
                ..Default::default()
            },
            scratch.path(),
        );
        let outcome = fetcher.fetch_one(candidate(8)).await;
        let artifact = outcome.artifact().unwrap();
        let dest = artifact
            .persist_to(&out.path().join("nested"), "clip.mp4")
            .await
            .unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), b"video-bytes");
    }
}
