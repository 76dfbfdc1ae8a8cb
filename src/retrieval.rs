use crate::config::Config;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MAX_DETAIL_CHARS: usize = 300;
const OUTPUT_TEMPLATE: &str = "%(id)s.%(ext)s";

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("video not available: {0}")]
    NotAvailable(String),
    #[error("access forbidden: {0}")]
    Forbidden(String),
    #[error("video not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Transfer(String),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected extractor output: {0}")]
    Parse(String),
}

/// Title and length of a remote video, as reported before any bytes move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    /// Whole seconds, 0 when the extractor does not know.
    pub duration_seconds: u64,
}

/// The two operations the batch pipeline needs from a video extractor.
///
/// Both can fail independently; failures are data for the caller, which turns
/// them into per-item outcomes.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn resolve_metadata(&self, url: &str) -> Result<VideoMetadata, RetrievalError>;

    /// Downloads `url` using the given format selector into `destination`, a
    /// directory owned by the caller, and returns the path of the written file.
    async fn transfer(
        &self,
        url: &str,
        destination: &Path,
        format: &str,
    ) -> Result<PathBuf, RetrievalError>;
}

/// Subset of `yt-dlp --dump-single-json` that the pipeline reads.
#[derive(Debug, Deserialize)]
struct InfoJson {
    title: Option<String>,
    fulltitle: Option<String>,
    duration: Option<f64>,
}

/// [`Retriever`] backed by the `yt-dlp` command line tool.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    cookies: Option<PathBuf>,
    socket_timeout_secs: Option<u64>,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies: None,
            socket_timeout_secs: None,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            program: cfg.ytdlp_path.clone(),
            cookies: cfg.cookies_file.clone(),
            socket_timeout_secs: cfg.socket_timeout_secs,
        }
    }

    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_socket_timeout(mut self, secs: Option<u64>) -> Self {
        self.socket_timeout_secs = secs;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--no-progress");

        if let Some(cookies) = &self.cookies {
            if cookies.exists() {
                cmd.arg("--cookies").arg(cookies);
            } else {
                warn!("cookies file {} does not exist; ignoring", cookies.display());
            }
        }
        if let Some(secs) = self.socket_timeout_secs {
            cmd.arg("--socket-timeout").arg(secs.to_string());
        }
        // Own process group: a terminal Ctrl-C stops the batch, not the
        // in-flight download.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> RetrievalError {
        RetrievalError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Retriever for YtDlp {
    async fn resolve_metadata(&self, url: &str) -> Result<VideoMetadata, RetrievalError> {
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg(url)
            .output()
            .await
            .map_err(|err| self.spawn_error(err))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp metadata for {url} exited with {}: {stderr}", output.status);
            return Err(classify_failure(&stderr));
        }

        parse_info_json(&output.stdout)
    }

    async fn transfer(
        &self,
        url: &str,
        destination: &Path,
        format: &str,
    ) -> Result<PathBuf, RetrievalError> {
        let template = destination.join(OUTPUT_TEMPLATE);
        let output = self
            .command()
            .arg("--no-part")
            .arg("-f")
            .arg(format)
            .arg("-o")
            .arg(&template)
            .arg(url)
            .output()
            .await
            .map_err(|err| self.spawn_error(err))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp transfer of {url} ({format}) exited with {}: {stderr}", output.status);
            return Err(RetrievalError::Transfer(failure_detail(&stderr)));
        }

        find_transferred_file(destination).ok_or_else(|| {
            RetrievalError::Transfer(format!(
                "extractor reported success but wrote no file into {}",
                destination.display()
            ))
        })
    }
}

fn parse_info_json(stdout: &[u8]) -> Result<VideoMetadata, RetrievalError> {
    let info: InfoJson = serde_json::from_slice(stdout)
        .map_err(|err| RetrievalError::Parse(format!("metadata JSON: {err}")))?;

    let title = info.title.or(info.fulltitle).unwrap_or_default();
    let duration_seconds = info
        .duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d.trunc() as u64)
        .unwrap_or(0);

    Ok(VideoMetadata {
        title,
        duration_seconds,
    })
}

/// Picks the single finished media file the extractor left behind.
fn find_transferred_file(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .find(|path| {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            !matches!(ext.as_deref(), Some("part" | "ytdl" | "json" | "temp"))
        })
}

/// Last meaningful stderr line, without yt-dlp's `ERROR:` prefix.
fn failure_detail(stderr: &str) -> String {
    let line = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("extractor exited without an error message");
    let line = line.strip_prefix("ERROR:").map(str::trim).unwrap_or(line);
    line.chars().take(MAX_DETAIL_CHARS).collect()
}

fn classify_failure(stderr: &str) -> RetrievalError {
    let detail = failure_detail(stderr);
    let lower = stderr.to_ascii_lowercase();

    if lower.contains("http error 404") || lower.contains("not found") || lower.contains("does not exist") {
        RetrievalError::NotFound(detail)
    } else if lower.contains("http error 403")
        || lower.contains("forbidden")
        || lower.contains("login")
        || lower.contains("log in")
        || lower.contains("cookies")
    {
        RetrievalError::Forbidden(detail)
    } else {
        RetrievalError::NotAvailable(detail)
    }
}
