//! Task runner API models

use serde::{Deserialize, Serialize};

/// Request to start isolated build instances from a task template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTaskRequest {
    /// Task template (task definition) reference
    pub template: String,

    /// Number of instances to start
    pub count: u32,

    /// Environment overrides for the build container
    pub environment: Vec<EnvironmentOverride>,
}

/// A single environment variable override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentOverride {
    pub name: String,
    pub value: String,
}

/// Task runner acceptance response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTaskResponse {
    /// Identifiers of the started tasks
    #[serde(default)]
    pub tasks: Vec<String>,

    /// Start failures reported by the scheduler
    #[serde(default)]
    pub failures: Vec<TaskFailure>,
}

/// A task the scheduler refused to start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub reason: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
