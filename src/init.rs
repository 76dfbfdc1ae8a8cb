use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

pub async fn ensure_directories(dirs: &[&Path]) -> Result<()> {
    for dir in dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
            eprintln!("[INFO] Created directory: {}", dir.display());
        }
    }
    Ok(())
}

/// True when `<program> --version` runs and exits successfully.
pub async fn check_program(program: &Path) -> bool {
    match tokio::process::Command::new(program)
        .arg("--version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}
