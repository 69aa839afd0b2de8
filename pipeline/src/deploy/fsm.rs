//! Finite state machine for deployment status

use serde::{Deserialize, Serialize};

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Accepted by the task runner, no build output seen yet
    Queued,

    /// Build executor is running
    Building,

    /// Artifacts uploaded and servable
    Ready,

    /// Build or upload failed
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Ready => "ready",
            DeploymentStatus::Failed => "failed",
        }
    }

    /// Whether the build executor has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Ready | DeploymentStatus::Failed)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// The executor published build output
    BuildStarted,

    /// The executor published a succeeded terminal status
    BuildSucceeded,

    /// The executor published a failed terminal status
    BuildFailed(String),

    /// The same id was dispatched again
    Redeploy,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in queued state
    pub fn new() -> Self {
        Self {
            state: DeploymentStatus::Queued,
            error: None,
        }
    }

    /// Restore an FSM from a persisted status
    pub fn restore(state: DeploymentStatus, error: Option<String>) -> Self {
        Self { state, error }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state.
    ///
    /// Returns `Ok(true)` when the state changed and `Ok(false)` for events
    /// that are valid but leave the state as is (repeated build output).
    pub fn process(&mut self, event: DeploymentEvent) -> Result<bool, String> {
        let new_state = match (&self.state, &event) {
            // From Queued
            (DeploymentStatus::Queued, DeploymentEvent::BuildStarted) => DeploymentStatus::Building,
            // The start log may have been dropped by the bus
            (DeploymentStatus::Queued, DeploymentEvent::BuildSucceeded) => DeploymentStatus::Ready,
            (DeploymentStatus::Queued, DeploymentEvent::BuildFailed(err)) => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }
            (DeploymentStatus::Queued, DeploymentEvent::Redeploy) => return Ok(false),

            // From Building
            (DeploymentStatus::Building, DeploymentEvent::BuildStarted) => return Ok(false),
            (DeploymentStatus::Building, DeploymentEvent::BuildSucceeded) => DeploymentStatus::Ready,
            (DeploymentStatus::Building, DeploymentEvent::BuildFailed(err)) => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }
            (DeploymentStatus::Building, DeploymentEvent::Redeploy) => DeploymentStatus::Queued,

            // From terminal states
            (DeploymentStatus::Ready | DeploymentStatus::Failed, DeploymentEvent::Redeploy) => {
                self.error = None;
                DeploymentStatus::Queued
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        let changed = new_state != self.state;
        self.state = new_state;
        Ok(changed)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
