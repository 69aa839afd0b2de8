//! One-shot build executor entry point

use std::sync::Arc;

use tracing::info;

use crate::bus::LogBus;
use crate::deploy::executor::{BuildExecutor, BuildOutcome, BuilderOptions};
use crate::deploy::job::BuildJob;
use crate::errors::PipelineError;
use crate::mqtt::client::MqttBus;
use crate::storage::blob::{BlobStore, ObjectBlobStore};
use crate::storage::settings::Settings;

/// Run one build job against the configured bus and blob store
pub async fn run_build(settings: &Settings, job: BuildJob) -> Result<BuildOutcome, PipelineError> {
    info!(
        "Building deployment {} from {}",
        job.deployment_id, job.source_repo_url
    );

    let bus: Arc<dyn LogBus> = Arc::new(MqttBus::connect(&settings.bus)?);
    let store: Arc<dyn BlobStore> = Arc::new(ObjectBlobStore::from_settings(&settings.blob_store)?);

    let executor = BuildExecutor::new(bus, store, BuilderOptions::from(&settings.builder));
    Ok(executor.run(&job).await)
}
