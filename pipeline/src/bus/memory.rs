//! In-process log bus

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::bus::{BusMessage, BusSubscription, LogBus};
use crate::errors::PipelineError;

/// Log bus backed by a tokio broadcast channel.
///
/// Publishing with no subscribers drops the message.
pub struct MemoryBus {
    tx: broadcast::Sender<BusMessage>,
}

impl MemoryBus {
    /// Create a bus buffering up to `capacity` messages per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl LogBus for MemoryBus {
    async fn publish(&self, deployment_id: &str, payload: String) -> Result<(), PipelineError> {
        // No receivers is not an error: there is no backlog
        let _ = self.tx.send(BusMessage {
            deployment_id: deployment_id.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe_logs(&self) -> Result<BusSubscription, PipelineError> {
        Ok(BusSubscription::new(self.tx.subscribe()))
    }

    async fn close(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}
