//! Server state

use std::sync::Arc;

use crate::dispatch::service::DispatchService;

/// Dispatch API state shared across handlers
pub struct ServerState {
    pub dispatch: Arc<DispatchService>,
}

impl ServerState {
    pub fn new(dispatch: Arc<DispatchService>) -> Self {
        Self { dispatch }
    }
}
