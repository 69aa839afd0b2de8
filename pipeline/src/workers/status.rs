//! Status tracker worker: log bus to persisted deployment status

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::bus::{BuildMessage, BuildStatus, BusSubscription};
use crate::deploy::executor::BUILD_STARTED;
use crate::deploy::fsm::DeploymentEvent;
use crate::storage::records::DeploymentRecords;

/// Status event carried by a log payload, if any
pub fn event_for(payload: &str) -> Option<DeploymentEvent> {
    match BuildMessage::parse(payload)? {
        BuildMessage::Log { log } if log == BUILD_STARTED => Some(DeploymentEvent::BuildStarted),
        BuildMessage::Log { .. } => None,
        BuildMessage::Status {
            status: BuildStatus::Succeeded,
            ..
        } => Some(DeploymentEvent::BuildSucceeded),
        BuildMessage::Status {
            status: BuildStatus::Failed,
            error,
            ..
        } => Some(DeploymentEvent::BuildFailed(
            error.unwrap_or_else(|| "build failed".to_string()),
        )),
    }
}

/// Run the status tracker worker
pub async fn run(
    mut subscription: BusSubscription,
    records: Arc<DeploymentRecords>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Status tracker worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Status tracker worker shutting down...");
                return;
            }
            message = subscription.recv() => {
                let Some(message) = message else {
                    warn!("Log bus closed, status tracker exiting");
                    return;
                };
                let Some(event) = event_for(&message.payload) else {
                    continue;
                };
                if let Err(e) = records.apply(&message.deployment_id, event).await {
                    error!(
                        "Failed to update status of {}: {}",
                        message.deployment_id, e
                    );
                }
            }
        }
    }
}
