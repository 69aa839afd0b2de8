//! Source checkout

use std::path::Path;

use tokio::process::Command;
use tracing::info;

use crate::deploy::command::run_streaming;
use crate::deploy::log::BuildLog;
use crate::errors::PipelineError;

/// Shallow-clone `repo_url` into `target_dir`, forwarding git's output.
///
/// An existing checkout is replaced.
pub async fn clone_repository(
    repo_url: &str,
    target_dir: &Path,
    log: &BuildLog,
) -> Result<(), PipelineError> {
    info!("Cloning {} into {}", repo_url, target_dir.display());

    if tokio::fs::try_exists(target_dir).await? {
        tokio::fs::remove_dir_all(target_dir).await?;
    }
    if let Some(parent) = target_dir.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1"])
        .arg(repo_url)
        .arg(target_dir)
        .env("GIT_TERMINAL_PROMPT", "0");

    let status = run_streaming(cmd, log).await?;
    if !status.success() {
        return Err(PipelineError::BuildError(format!(
            "git clone of {} failed ({})",
            repo_url, status
        )));
    }

    info!("Successfully cloned {}", repo_url);
    Ok(())
}
