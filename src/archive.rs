use std::collections::HashSet;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio::fs;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip encoding failed: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("archive name {0:?} must be a bare file name")]
    InvalidName(String),
}

/// True for a single path component: no separators, not `.` or `..`.
pub fn is_bare_file_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

/// Resolves name collisions in order: the first `a` stays `a`, later ones
/// become `a_2`, `a_3`, and so on, skipping any name already taken.
pub fn unique_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let name = name.as_ref();
        let mut candidate = name.to_string();
        let mut n = 2;
        while used.contains(&candidate) {
            candidate = format!("{name}_{n}");
            n += 1;
        }
        used.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

/// Writes every `(entry name, reader)` pair into a zip stream. Video payloads
/// are already compressed, so entries are stored as-is.
pub fn write_zip<W, R, I>(writer: W, entries: I) -> Result<W, ArchiveError>
where
    W: Write + Seek,
    R: Read,
    I: IntoIterator<Item = (String, R)>,
{
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);

    for (name, mut reader) in entries {
        zip.start_file(name, options)?;
        std::io::copy(&mut reader, &mut zip)?;
    }

    Ok(zip.finish()?)
}

/// Packages an in-memory filename → bytes mapping into zip bytes.
pub fn build_archive(entries: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, ArchiveError> {
    let readers = entries
        .into_iter()
        .map(|(name, bytes)| (name, Cursor::new(bytes)));
    let cursor = write_zip(Cursor::new(Vec::new()), readers)?;
    Ok(cursor.into_inner())
}

/// A combined archive written to scratch storage owned by this value.
#[derive(Debug)]
pub struct Archive {
    file_name: String,
    entries: Vec<String>,
    size: u64,
    path: PathBuf,
    _storage: TempDir,
}

impl Archive {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Entry names, in the order they were written.
    pub fn entries(&self) -> &[String] {
        &self.entries
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

    pub async fn persist_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(dir).await?;
        let dest = dir.join(&self.file_name);
        fs::copy(&self.path, &dest).await?;
        Ok(dest)
    }
}

/// Streams files from disk into a new archive named `file_name`. Sources are
/// given as `(entry name, source path)` and are only read, never moved.
pub async fn build_archive_file(
    file_name: &str,
    sources: Vec<(String, PathBuf)>,
    scratch_parent: Option<&Path>,
) -> Result<Archive, ArchiveError> {
    if !is_bare_file_name(file_name) {
        return Err(ArchiveError::InvalidName(file_name.to_string()));
    }
    let mut builder = tempfile::Builder::new();
    builder.prefix("reel-batch-archive-");
    let storage = match scratch_parent {
        Some(parent) => builder.tempdir_in(parent)?,
        None => builder.tempdir()?,
    };
    let path = storage.path().join(file_name);
    let entries: Vec<String> = sources.iter().map(|(name, _)| name.clone()).collect();

    let zip_path = path.clone();
    let size = tokio::task::spawn_blocking(move || -> Result<u64, ArchiveError> {
        let file = std::fs::File::create(&zip_path)?;
        let readers = sources
            .into_iter()
            .map(|(name, src)| std::fs::File::open(&src).map(|f| (name, f)))
            .collect::<Result<Vec<_>, _>>()?;
        let file = write_zip(file, readers)?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    })
    .await??;

    Ok(Archive {
        file_name: file_name.to_string(),
        entries,
        size,
        path,
        _storage: storage,
    })
}
