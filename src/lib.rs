use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

pub mod archive;
pub mod batch;
pub mod config;
pub mod fetch;
pub mod init;
pub mod links;
pub mod media;
pub mod platform;
pub mod report;
pub mod retrieval;
pub mod sanitize;

pub use batch::{ArchiveStatus, BatchError, BatchRequest, BatchResult, CancelFlag, run_batch};
pub use fetch::{Artifact, FetchError, FetchOutcome, FetchStatus, Fetcher, FormatPolicy};
pub use links::{LinkCandidate, LinkKind, dedup, extract_links};
pub use retrieval::{RetrievalError, Retriever, VideoMetadata, YtDlp};
pub use sanitize::sanitize_title;

/// Receives each formatted progress line, e.g. `[OK] [2/5] title.mp4 (1024 bytes)`.
pub type BatchLogHook = Arc<Mutex<dyn Fn(&str) + Send + Sync + 'static>>;

static LOG_HOOK: Lazy<Mutex<Option<BatchLogHook>>> = Lazy::new(|| Mutex::new(None));

/// Installs (or clears) a callback that receives every progress line the
/// pipeline prints, so a front end can mirror it.
pub fn set_log_hook(hook: Option<BatchLogHook>) {
    if let Ok(mut guard) = LOG_HOOK.lock() {
        *guard = hook;
    }
}

/// Writes `[TAG] message` to stderr and hands the same line to the installed hook.
pub(crate) fn logv(tag: &str, message: &str) {
    let line = format!("[{tag}] {message}");
    eprintln!("{line}");

    let hook = match LOG_HOOK.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => return,
    };
    if let Some(hook) = hook {
        if let Ok(callback) = hook.lock() {
            callback(&line);
        }
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}
