//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};

/// A deployment record, persisted by the dispatch side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Deployment slug, also the storage prefix, topic suffix and subdomain
    pub id: String,

    /// Repository the build was dispatched for
    pub source_repo_url: String,

    /// Current status
    pub status: DeploymentStatus,

    /// Failure reason of the last build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Create a queued deployment
    pub fn queued(id: &str, source_repo_url: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            source_repo_url: source_repo_url.to_string(),
            status: DeploymentStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status event.
    ///
    /// Returns whether the record changed.
    pub fn apply(&mut self, event: DeploymentEvent) -> Result<bool, String> {
        let mut fsm = DeploymentFsm::restore(self.status, self.error.clone());
        let changed = fsm.process(event)?;
        if changed {
            self.status = fsm.state();
            self.error = fsm.error().map(str::to_string);
            self.updated_at = Utc::now();
        }
        Ok(changed)
    }
}

/// Accepted submission returned by the dispatch service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Resolved deployment id
    pub id: String,

    /// URL the deployment will be served from
    pub serving_url: String,
}
