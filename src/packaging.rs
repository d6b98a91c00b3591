//! Dependency archive: the workflow tree zipped for submission.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::info;

/// Rebuild `archive` from the contents of `workflows_dir` using `zip`.
/// Returns the absolute archive path.
pub async fn bundle_workflows(workflows_dir: &Path, archive: &Path) -> Result<PathBuf> {
    let archive = if archive.is_absolute() {
        archive.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot resolve working directory")?
            .join(archive)
    };

    match tokio::fs::remove_file(&archive).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to remove {}", archive.display()))
        }
    }

    info!(dir = %workflows_dir.display(), archive = %archive.display(), "Preparing dependencies...");
    let output = Command::new("zip")
        .arg("-r")
        .arg("-q")
        .arg(&archive)
        .arg(".")
        .current_dir(workflows_dir)
        .output()
        .await
        .context("failed to execute zip (is it installed?)")?;

    if !output.status.success() {
        anyhow::bail!(
            "zip exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_workflow_dir_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = bundle_workflows(
            &dir.path().join("no-such-dir"),
            &dir.path().join("deps.zip"),
        )
        .await;
        assert!(result.is_err());
    }
}
