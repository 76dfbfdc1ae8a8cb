use crate::batch::{ArchiveStatus, BatchResult};
use crate::fetch::FetchStatus;
use crate::links::LinkKind;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::{logok, logw};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub index: usize,
    pub url: String,
    pub source: String,
    pub kind: LinkKind,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ArchiveReport {
    NotRequested,
    NoSuccesses,
    Built { file_name: String, entries: Vec<String>, size_bytes: u64 },
    Failed { reason: String },
}

/// Serializable view of a [`BatchResult`], written next to the downloads.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub success_count: usize,
    pub failure_count: usize,
    pub items: Vec<ItemReport>,
    pub archive: ArchiveReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub save_failures: Vec<SaveFailure>,
}

/// A download or archive that was produced but could not be copied out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveFailure {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct SavedFiles {
    pub saved: Vec<PathBuf>,
    pub failures: Vec<SaveFailure>,
}

/// Copies every successful artifact, then the archive, into `dir`.
///
/// A failed copy is logged and recorded; the remaining files are still saved.
pub async fn persist_downloads(result: &BatchResult, dir: &Path) -> SavedFiles {
    let mut out = SavedFiles::default();
    for (outcome, name) in result.outcomes().iter().zip(result.download_names()) {
        let (Some(artifact), Some(name)) = (outcome.artifact(), name) else {
            continue;
        };
        match artifact.persist_to(dir, name).await {
            Ok(dest) => out.saved.push(dest),
            Err(err) => {
                logw(format!("Failed to save {}: {}", name, err));
                out.failures.push(SaveFailure {
                    file_name: name.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    if let ArchiveStatus::Built(archive) = result.archive() {
        match archive.persist_to(dir).await {
            Ok(dest) => {
                logok(format!("Archive saved: {}", dest.display()));
                out.saved.push(dest);
            }
            Err(err) => {
                logw(format!("Failed to save archive {}: {}", archive.file_name(), err));
                out.failures.push(SaveFailure {
                    file_name: archive.file_name().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
    out
}

impl BatchReport {
    pub fn from_result(result: &BatchResult) -> Self {
        let items = result
            .outcomes()
            .iter()
            .zip(result.download_names())
            .enumerate()
            .map(|(idx, (outcome, name))| {
                let candidate = outcome.candidate();
                let mut item = ItemReport {
                    index: idx + 1,
                    url: candidate.canonical().to_string(),
                    source: candidate.raw().to_string(),
                    kind: candidate.kind(),
                    status: ItemStatus::Failure,
                    file_name: None,
                    duration_seconds: None,
                    size_bytes: None,
                    reason: None,
                };
                match outcome.status() {
                    FetchStatus::Success(artifact) => {
                        item.status = ItemStatus::Success;
                        item.file_name = name.clone();
                        item.duration_seconds = Some(artifact.duration_seconds());
                        item.size_bytes = Some(artifact.size());
                    }
                    FetchStatus::Failure(err) => item.reason = Some(err.to_string()),
                }
                item
            })
            .collect();

        let archive = match result.archive() {
            ArchiveStatus::NotRequested => ArchiveReport::NotRequested,
            ArchiveStatus::NoSuccesses => ArchiveReport::NoSuccesses,
            ArchiveStatus::Built(archive) => ArchiveReport::Built {
                file_name: archive.file_name().to_string(),
                entries: archive.entries().to_vec(),
                size_bytes: archive.size(),
            },
            ArchiveStatus::Failed(reason) => ArchiveReport::Failed {
                reason: reason.clone(),
            },
        };

        Self {
            started_at: result.started_at(),
            finished_at: result.finished_at(),
            cancelled: result.cancelled(),
            success_count: result.success_count(),
            failure_count: result.failure_count(),
            items,
            archive,
            save_failures: Vec::new(),
        }
    }

    pub fn with_save_failures(mut self, failures: Vec<SaveFailure>) -> Self {
        self.save_failures = failures;
        self
    }

    pub async fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serialize batch report")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        Ok(())
    }
}

fn format_duration(secs: u64) -> String {
    if secs == 0 {
        return "?:??".to_string();
    }
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Human-readable summary: one line per item, then the totals.
pub fn render_summary(report: &BatchReport) -> String {
    let mut out = String::new();
    for item in &report.items {
        match item.status {
            ItemStatus::Success => {
                let _ = writeln!(
                    out,
                    "  [{:>3}] OK    {}  {} ({})",
                    item.index,
                    item.url,
                    item.file_name.as_deref().unwrap_or("-"),
                    format_duration(item.duration_seconds.unwrap_or(0)),
                );
            }
            ItemStatus::Failure => {
                let _ = writeln!(
                    out,
                    "  [{:>3}] FAIL  {}  {}",
                    item.index,
                    item.url,
                    item.reason.as_deref().unwrap_or("unknown error"),
                );
            }
        }
    }

    let _ = writeln!(
        out,
        "Succeeded: {}  Failed: {}  Total: {}{}",
        report.success_count,
        report.failure_count,
        report.items.len(),
        if report.cancelled { "  (cancelled)" } else { "" }
    );
    match &report.archive {
        ArchiveReport::Built { file_name, entries, .. } => {
            let _ = writeln!(out, "Archive: {} ({} entries)", file_name, entries.len());
        }
        ArchiveReport::Failed { reason } => {
            let _ = writeln!(out, "Archive failed: {} (individual files are still available)", reason);
        }
        ArchiveReport::NoSuccesses => {
            let _ = writeln!(out, "Archive skipped: nothing downloaded");
        }
        ArchiveReport::NotRequested => {}
    }
    for failure in &report.save_failures {
        let _ = writeln!(out, "Not saved: {} ({})", failure.file_name, failure.reason);
    }
    out
}
