//! Log bus: per-deployment publish/subscribe channels
//!
//! Delivery is at-most-once with no persistence. A subscription only sees
//! messages published after it was created, in publish order per topic.

pub mod memory;
pub mod topics;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::errors::PipelineError;

/// A message received from a deployment's log topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub deployment_id: String,

    /// Raw payload, forwarded to clients without validation
    pub payload: String,
}

/// Terminal outcome of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Succeeded,
    Failed,
}

/// Payloads published by the build executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildMessage {
    /// Terminal status, always the last message of a build
    Status {
        status: BuildStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default)]
        files: usize,
    },

    /// One line of build output or a progress note
    Log { log: String },
}

impl BuildMessage {
    pub fn log(message: impl Into<String>) -> Self {
        BuildMessage::Log {
            log: message.into(),
        }
    }

    /// Serialize for the wire
    pub fn to_payload(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a wire payload, `None` for payloads of unknown shape
    pub fn parse(payload: &str) -> Option<Self> {
        serde_json::from_str(payload).ok()
    }
}

/// Live subscription to every deployment log topic
pub struct BusSubscription {
    rx: broadcast::Receiver<BusMessage>,
}

impl BusSubscription {
    pub fn new(rx: broadcast::Receiver<BusMessage>) -> Self {
        Self { rx }
    }

    /// Receive the next message, `None` once the bus is closed.
    ///
    /// A subscriber that falls behind loses the overflowed messages.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Log bus subscriber lagged, dropped {} messages", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Log bus client
#[async_trait]
pub trait LogBus: Send + Sync {
    /// Publish a payload on the deployment's log topic
    async fn publish(&self, deployment_id: &str, payload: String) -> Result<(), PipelineError>;

    /// Subscribe to the log topics of all deployments
    async fn subscribe_logs(&self) -> Result<BusSubscription, PipelineError>;

    /// Flush pending publishes and disconnect
    async fn close(&self) -> Result<(), PipelineError>;
}
