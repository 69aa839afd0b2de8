//! Task runners: launch one isolated build executor per deployment

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use openapi_client::models::{EnvironmentOverride, RunTaskRequest};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::job::{BuildJob, ENV_WORKSPACE};
use crate::errors::PipelineError;
use crate::filesys::dir::Dir;
use crate::http::client::HttpClient;
use crate::storage::settings::TaskRunnerSettings;

/// Starts build executor instances. Implementations hold no handle to the
/// instance once it is started.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Start exactly one build instance for the job
    async fn start(&self, job: &BuildJob) -> Result<(), PipelineError>;
}

/// Task runner backed by a remote scheduler API
pub struct HttpTaskRunner {
    client: HttpClient,
    template: String,
}

impl HttpTaskRunner {
    pub fn new(client: HttpClient, template: &str) -> Self {
        Self {
            client,
            template: template.to_string(),
        }
    }

    pub fn from_settings(settings: &TaskRunnerSettings) -> Result<Self, PipelineError> {
        let client = HttpClient::with_timeout(
            &settings.endpoint,
            Duration::from_secs(settings.request_timeout_secs),
        )?
        .with_token(settings.token.clone());
        Ok(Self::new(client, &settings.template))
    }

    /// Scheduler request for a job
    pub fn request_for(&self, job: &BuildJob) -> RunTaskRequest {
        RunTaskRequest {
            template: self.template.clone(),
            count: 1,
            environment: job
                .env()
                .into_iter()
                .map(|(name, value)| EnvironmentOverride { name, value })
                .collect(),
        }
    }
}

#[async_trait]
impl TaskRunner for HttpTaskRunner {
    async fn start(&self, job: &BuildJob) -> Result<(), PipelineError> {
        // transport errors keep their kind so timeouts are not retried
        let response = self.client.run_task(&self.request_for(job)).await?;

        if let Some(failure) = response.failures.first() {
            return Err(PipelineError::DispatchError(match &failure.detail {
                Some(detail) => format!("{}: {}", failure.reason, detail),
                None => failure.reason.clone(),
            }));
        }
        if response.tasks.is_empty() {
            return Err(PipelineError::DispatchError(
                "task runner started no instance".to_string(),
            ));
        }

        info!(
            "Started build task {} for {}",
            response.tasks[0], job.deployment_id
        );
        Ok(())
    }
}

/// Task runner launching the builder binary as a local child process
pub struct ProcessTaskRunner {
    program: PathBuf,
    config_path: Option<PathBuf>,
    workspaces: Dir,
}

impl ProcessTaskRunner {
    pub fn new(program: PathBuf, config_path: Option<PathBuf>, workspaces: Dir) -> Self {
        Self {
            program,
            config_path,
            workspaces,
        }
    }

    /// Launch `builder_program`, or the running binary when unset
    pub fn from_settings(
        settings: &TaskRunnerSettings,
        config_path: Option<PathBuf>,
        workspaces: Dir,
    ) -> Result<Self, PipelineError> {
        let program = match &settings.builder_program {
            Some(program) => PathBuf::from(program),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(program, config_path, workspaces))
    }
}

#[async_trait]
impl TaskRunner for ProcessTaskRunner {
    async fn start(&self, job: &BuildJob) -> Result<(), PipelineError> {
        let short = uuid::Uuid::new_v4().simple().to_string();
        let workspace = self
            .workspaces
            .subdir(&format!("{}-{}", job.deployment_id, &short[..8]));
        workspace.create().await?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("--build");
        if let Some(config) = &self.config_path {
            cmd.arg(format!("--config={}", config.display()));
        }
        cmd.envs(job.env())
            .env(ENV_WORKSPACE, workspace.path())
            .stdin(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| {
            PipelineError::DispatchError(format!(
                "failed to launch {}: {}",
                self.program.display(),
                e
            ))
        })?;

        info!(
            "Launched builder pid={:?} for {} in {}",
            child.id(),
            job.deployment_id,
            workspace.path().display()
        );

        // reap the child without tying it to the request
        let deployment_id = job.deployment_id.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Builder for {} exited with {}", deployment_id, status),
                Err(e) => warn!("Failed to wait for builder of {}: {}", deployment_id, e),
            }
        });

        Ok(())
    }
}
