use anyhow::{Context, Result};
use crate::archive::is_bare_file_name;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ytdlp_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Format selector tried first for every transfer.
    pub primary_format: String,
    /// The single fallback selector, tried once if the primary one fails.
    pub alternate_format: Option<String>,
    pub socket_timeout_secs: Option<u64>,
    pub cookies_file: Option<PathBuf>,
    pub max_items: usize,
    pub jobs: usize,
    /// Probe the downloaded file with ffprobe when the extractor reports no duration.
    pub probe_duration: bool,
    pub archive_name: String,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffprobe_path: PathBuf::from("ffprobe"),
            primary_format: default_primary_format(),
            alternate_format: Some(default_alternate_format()),
            socket_timeout_secs: Some(30),
            cookies_file: None,
            max_items: 50,
            jobs: 1,
            probe_duration: true,
            archive_name: "reels.zip".to_string(),
            output_dir: PathBuf::from("downloads"),
        }
    }
}

fn default_primary_format() -> String {
    "best[ext=mp4]".to_string()
}

fn default_alternate_format() -> String {
    "best".to_string()
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if fs::metadata(&path).await.is_ok() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ytdlp_path.as_os_str().is_empty() {
            anyhow::bail!("config.json: ytdlp_path missing");
        }
        if self.primary_format.trim().is_empty() {
            anyhow::bail!("config.json: primary_format missing");
        }
        if self.max_items == 0 {
            anyhow::bail!("config.json: max_items must be at least 1");
        }
        if self.jobs == 0 {
            anyhow::bail!("config.json: jobs must be at least 1");
        }
        if self.archive_name.trim().is_empty() {
            anyhow::bail!("config.json: archive_name missing");
        }
        if !is_bare_file_name(&self.archive_name) {
            anyhow::bail!(
                "config.json: archive_name must be a plain file name, got {:?}",
                self.archive_name
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[tokio::test]
    async fn partial_config_keeps_defaults() {
        let file = make_config(r#"{"max_items": 10, "cookies_file": "/tmp/cookies.txt"}"#);
        let cfg = Config::load(file.path()).await.unwrap();
        assert_eq!(cfg.max_items, 10);
        assert_eq!(cfg.cookies_file, Some(PathBuf::from("/tmp/cookies.txt")));
        assert_eq!(cfg.ytdlp_path, PathBuf::from("yt-dlp"));
        assert_eq!(cfg.primary_format, "best[ext=mp4]");
        assert_eq!(cfg.alternate_format.as_deref(), Some("best"));
        assert_eq!(cfg.jobs, 1);
    }

    #[tokio::test]
    async fn alternate_format_can_be_disabled() {
        let file = make_config(r#"{"alternate_format": null}"#);
        let cfg = Config::load(file.path()).await.unwrap();
        assert!(cfg.alternate_format.is_none());
    }

    #[tokio::test]
    async fn zero_limits_are_rejected() {
        let file = make_config(r#"{"max_items": 0}"#);
        assert!(Config::load(file.path()).await.is_err());
        let file = make_config(r#"{"jobs": 0}"#);
        assert!(Config::load(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn archive_name_cannot_leave_the_output_dir() {
        for name in ["../x.zip", "a/b.zip", "a\\\\b.zip", ".."] {
            let file = make_config(&format!(r#"{{"archive_name": "{name}"}}"#));
            let err = Config::load(file.path()).await.unwrap_err();
            assert!(err.to_string().contains("archive_name"), "{name}: {err}");
        }
        let file = make_config(r#"{"archive_name": "weekend.zip"}"#);
        assert_eq!(Config::load(file.path()).await.unwrap().archive_name, "weekend.zip");
    }

    #[tokio::test]
    async fn malformed_json_is_reported() {
        let file = make_config("{not json");
        let err = Config::load(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(dir.path().join("config.json")).await.unwrap();
        assert_eq!(cfg.max_items, 50);
        assert_eq!(cfg.archive_name, "reels.zip");
    }
}
