//! Build log publisher

use std::sync::Arc;

use tracing::{info, warn};

use crate::bus::{BuildMessage, BuildStatus, LogBus};
use crate::errors::PipelineError;

/// Publishes one deployment's build output on its log topic
pub struct BuildLog {
    bus: Arc<dyn LogBus>,
    deployment_id: String,
}

impl BuildLog {
    pub fn new(bus: Arc<dyn LogBus>, deployment_id: &str) -> Self {
        Self {
            bus,
            deployment_id: deployment_id.to_string(),
        }
    }

    /// Publish a log line. Delivery is best-effort: a bus failure is logged
    /// locally and never fails the build.
    pub async fn line(&self, message: impl Into<String>) {
        let message = message.into();
        info!(deployment = %self.deployment_id, "{}", message);

        if let Err(e) = self.send(&BuildMessage::log(message)).await {
            warn!(deployment = %self.deployment_id, "Failed to publish log line: {}", e);
        }
    }

    /// Publish the terminal status event
    pub async fn status(
        &self,
        status: BuildStatus,
        error: Option<String>,
        files: usize,
    ) -> Result<(), PipelineError> {
        self.send(&BuildMessage::Status {
            status,
            error,
            files,
        })
        .await
    }

    async fn send(&self, message: &BuildMessage) -> Result<(), PipelineError> {
        self.bus
            .publish(&self.deployment_id, message.to_payload()?)
            .await
    }
}
