//! Dispatch service: accept deployment requests and hand them to a task runner

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::deploy::job::BuildJob;
use crate::dispatch::runner::TaskRunner;
use crate::errors::PipelineError;
use crate::ids::{generate_slug, validate_slug};
use crate::models::deployment::{Deployment, Submission};
use crate::storage::records::DeploymentRecords;
use crate::storage::settings::{DispatchSettings, ServingSettings};
use crate::utils::{retry, RetryPolicy};

/// Dispatch service options
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub serving: ServingSettings,
    pub retry: RetryPolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&DispatchSettings::default())
    }
}

impl From<&DispatchSettings> for DispatchOptions {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            serving: settings.serving.clone(),
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                ..Default::default()
            },
        }
    }
}

/// Public URL a deployment is served from
pub fn serving_url(serving: &ServingSettings, id: &str) -> String {
    match serving.port {
        Some(port) => format!("{}://{}.{}:{}", serving.scheme, id, serving.domain, port),
        None => format!("{}://{}.{}", serving.scheme, id, serving.domain),
    }
}

/// Per-id locks, held for the whole record-then-start sequence of a submit
#[derive(Default)]
struct SubmitLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SubmitLocks {
    async fn acquire(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    async fn release(&self, id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(id);
        }
    }
}

pub struct DispatchService {
    runner: Arc<dyn TaskRunner>,
    records: Arc<DeploymentRecords>,
    options: DispatchOptions,
    submit_locks: SubmitLocks,
}

impl DispatchService {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        records: Arc<DeploymentRecords>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            runner,
            records,
            options,
            submit_locks: SubmitLocks::default(),
        }
    }

    /// Queue a build of `source_repo_url` under `slug`, or a fresh id.
    ///
    /// Returns once the task runner accepted the start request; the build
    /// itself runs asynchronously. Concurrent submits of one id run one after
    /// the other.
    pub async fn submit(
        &self,
        source_repo_url: &str,
        slug: Option<&str>,
    ) -> Result<Submission, PipelineError> {
        let source_repo_url = source_repo_url.trim();
        if source_repo_url.is_empty() {
            return Err(PipelineError::ValidationError(
                "gitUrl must not be empty".to_string(),
            ));
        }

        let id = match slug.map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => {
                validate_slug(slug)?;
                slug.to_string()
            }
            None => generate_slug(),
        };

        let lock = self.submit_locks.acquire(&id).await;
        let result = {
            let _guard = lock.lock().await;
            self.dispatch(source_repo_url, id.clone()).await
        };
        self.submit_locks.release(&id, lock).await;
        result
    }

    async fn dispatch(&self, source_repo_url: &str, id: String) -> Result<Submission, PipelineError> {
        // the record exists before the build can report progress
        let previous = self.records.get(&id).await?;
        self.records.upsert_queued(&id, source_repo_url).await?;

        let job = BuildJob::new(source_repo_url, &id);
        let label = format!("Dispatch of {}", id);
        if let Err(e) = retry(&self.options.retry, &label, || self.runner.start(&job)).await {
            error!("Task runner rejected {}: {}", id, e);
            self.records.rollback(&id, previous).await?;
            return Err(match e {
                PipelineError::DispatchError(_) => e,
                other => PipelineError::DispatchError(other.to_string()),
            });
        }

        let url = self.url_for(&id);
        info!("Queued deployment {} from {} ({})", id, source_repo_url, url);

        Ok(Submission {
            id,
            serving_url: url,
        })
    }

    /// Serving URL of a deployment id
    pub fn url_for(&self, id: &str) -> String {
        serving_url(&self.options.serving, id)
    }

    /// Get a deployment record
    pub async fn get(&self, id: &str) -> Result<Deployment, PipelineError> {
        let not_found = || PipelineError::NotFound(format!("deployment '{}'", id));
        if validate_slug(id).is_err() {
            return Err(not_found());
        }
        self.records.get(id).await?.ok_or_else(not_found)
    }
}
