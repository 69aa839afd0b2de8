//! Build executor
//!
//! Runs once per deployment: checkout, install-then-build, artifact upload.
//! Every exit path ends with exactly one terminal status event on the
//! deployment's log topic, after which the bus connection is closed.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::bus::{BuildStatus, LogBus};
use crate::deploy::command::run_shell;
use crate::deploy::git::clone_repository;
use crate::deploy::job::BuildJob;
use crate::deploy::log::BuildLog;
use crate::errors::PipelineError;
use crate::filesys::dir::Dir;
use crate::storage::blob::{content_type_for, BlobStore};
use crate::storage::settings::BuilderSettings;
use crate::utils::{retry, RetryPolicy};

/// Sentinel emitted after the build command exits and again after uploads
pub const BUILD_COMPLETE: &str = "Build Complete";

/// First log line of every build
pub const BUILD_STARTED: &str = "Build started";

/// Build executor options
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    pub workspace_dir: PathBuf,

    /// Source checkout, relative to the workspace
    pub source_dir: String,

    /// Build output, relative to the source checkout
    pub output_dir: String,

    pub install_command: String,
    pub build_command: String,
    pub clone_source: bool,
    pub fail_on_nonzero_exit: bool,
    pub upload_retry: RetryPolicy,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self::from(&BuilderSettings::default())
    }
}

impl From<&BuilderSettings> for BuilderOptions {
    fn from(settings: &BuilderSettings) -> Self {
        Self {
            workspace_dir: PathBuf::from(&settings.workspace_dir),
            source_dir: settings.source_dir.clone(),
            output_dir: settings.output_dir.clone(),
            install_command: settings.install_command.clone(),
            build_command: settings.build_command.clone(),
            clone_source: settings.clone_source,
            fail_on_nonzero_exit: settings.fail_on_nonzero_exit,
            upload_retry: RetryPolicy {
                max_attempts: settings.upload_max_attempts,
                ..Default::default()
            },
        }
    }
}

impl BuilderOptions {
    /// The fixed two-step command line
    pub fn command_line(&self) -> String {
        match (
            self.install_command.trim().is_empty(),
            self.build_command.trim().is_empty(),
        ) {
            (true, _) => self.build_command.clone(),
            (false, true) => self.install_command.clone(),
            (false, false) => format!("{} && {}", self.install_command, self.build_command),
        }
    }
}

/// Result of one build run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub status: BuildStatus,
    pub files_uploaded: usize,
    pub error: Option<String>,
}

impl BuildOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }
}

/// Runs build jobs against a log bus and a blob store
pub struct BuildExecutor {
    bus: Arc<dyn LogBus>,
    store: Arc<dyn BlobStore>,
    options: BuilderOptions,
}

impl BuildExecutor {
    pub fn new(bus: Arc<dyn LogBus>, store: Arc<dyn BlobStore>, options: BuilderOptions) -> Self {
        Self {
            bus,
            store,
            options,
        }
    }

    /// Run a job to completion, publish its terminal status and close the bus
    pub async fn run(&self, job: &BuildJob) -> BuildOutcome {
        let outcome = self.run_without_close(job).await;

        if let Err(e) = self.bus.close().await {
            warn!("Failed to close log bus: {}", e);
        }
        outcome
    }

    /// Run a job and publish its terminal status, leaving the bus open
    pub async fn run_without_close(&self, job: &BuildJob) -> BuildOutcome {
        let log = BuildLog::new(self.bus.clone(), &job.deployment_id);
        log.line(BUILD_STARTED).await;

        let mut uploaded = 0;
        let outcome = match self.execute(job, &log, &mut uploaded).await {
            Ok(()) => {
                info!(
                    "Deployment {} built, {} files uploaded",
                    job.deployment_id, uploaded
                );
                BuildOutcome {
                    status: BuildStatus::Succeeded,
                    files_uploaded: uploaded,
                    error: None,
                }
            }
            Err(e) => {
                error!("Deployment {} failed: {}", job.deployment_id, e);
                log.line(format!("Build failed: {}", e)).await;
                BuildOutcome {
                    status: BuildStatus::Failed,
                    files_uploaded: uploaded,
                    error: Some(e.to_string()),
                }
            }
        };

        if let Err(e) = log
            .status(outcome.status, outcome.error.clone(), outcome.files_uploaded)
            .await
        {
            error!(
                "Failed to publish terminal status for {}: {}",
                job.deployment_id, e
            );
        }
        outcome
    }

    fn workspace(&self, job: &BuildJob) -> PathBuf {
        job.workspace
            .clone()
            .unwrap_or_else(|| self.options.workspace_dir.clone())
    }

    async fn execute(
        &self,
        job: &BuildJob,
        log: &BuildLog,
        uploaded: &mut usize,
    ) -> Result<(), PipelineError> {
        let source = self.workspace(job).join(&self.options.source_dir);

        if self.options.clone_source {
            clone_repository(&job.source_repo_url, &source, log).await?;
        } else if !tokio::fs::try_exists(&source).await? {
            return Err(PipelineError::BuildError(format!(
                "source directory {} does not exist",
                source.display()
            )));
        }

        let status = run_shell(&self.options.command_line(), &source, log).await?;
        log.line(BUILD_COMPLETE).await;

        if !status.success() {
            if self.options.fail_on_nonzero_exit {
                return Err(PipelineError::BuildError(format!(
                    "build command exited with {}",
                    status
                )));
            }
            warn!("Build command exited with {}, uploading anyway", status);
        }

        let output = Dir::new(source.join(&self.options.output_dir));
        if !output.exists().await {
            return Err(PipelineError::BuildError(format!(
                "build output directory {} not found",
                output.path().display()
            )));
        }

        let files = output.walk_files().await?;
        log.line("Uploading files").await;
        self.upload_all(job, &output, &files, log, uploaded).await?;

        log.line(BUILD_COMPLETE).await;
        Ok(())
    }

    /// Upload files one at a time, aborting on the first failure
    async fn upload_all(
        &self,
        job: &BuildJob,
        output: &Dir,
        files: &[String],
        log: &BuildLog,
        uploaded: &mut usize,
    ) -> Result<(), PipelineError> {
        for relative_path in files {
            log.line(format!("Uploading {}", relative_path)).await;

            let bytes = Bytes::from(output.file(relative_path).read_bytes().await?);
            let content_type = content_type_for(relative_path);
            let label = format!("Upload of {}", relative_path);

            let result = retry(&self.options.upload_retry, &label, || {
                self.store.put_artifact(
                    &job.deployment_id,
                    relative_path,
                    bytes.clone(),
                    &content_type,
                )
            })
            .await;

            if let Err(e) = result {
                return Err(PipelineError::BuildError(format!(
                    "upload aborted after {} of {} files: {}",
                    uploaded,
                    files.len(),
                    e
                )));
            }

            *uploaded += 1;
            log.line(format!("Uploaded {}", relative_path)).await;
        }
        Ok(())
    }
}
