//! Log relay worker: log bus to realtime gateway groups

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::BusSubscription;
use crate::gateway::groups::Groups;

/// Run the log relay worker.
///
/// Every message on `logs/<id>` is forwarded verbatim to group `<id>`, in the
/// order it was received.
pub async fn run(
    mut subscription: BusSubscription,
    groups: Arc<Groups>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Log relay worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Log relay worker shutting down...");
                return;
            }
            message = subscription.recv() => {
                let Some(message) = message else {
                    warn!("Log bus closed, log relay worker exiting");
                    return;
                };
                let delivered = groups
                    .broadcast(&message.deployment_id, &message.payload)
                    .await;
                debug!(
                    "Relayed message for {} to {} clients",
                    message.deployment_id, delivered
                );
            }
        }
    }
}
