//! Build job seed

use std::path::PathBuf;

use crate::errors::PipelineError;
use crate::ids::validate_slug;

/// Environment variable carrying the source repository URL
pub const ENV_REPOSITORY_URL: &str = "GIT_REPOSITORY_URL";

/// Environment variable carrying the deployment id
pub const ENV_DEPLOYMENT_ID: &str = "DEPLOYMENT_ID";

/// Optional workspace override for locally launched builds
pub const ENV_WORKSPACE: &str = "BUILD_WORKSPACE";

/// One build request, as seeded into the isolated environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    pub source_repo_url: String,
    pub deployment_id: String,

    /// Overrides the configured workspace directory
    pub workspace: Option<PathBuf>,
}

impl BuildJob {
    pub fn new(source_repo_url: &str, deployment_id: &str) -> Self {
        Self {
            source_repo_url: source_repo_url.to_string(),
            deployment_id: deployment_id.to_string(),
            workspace: None,
        }
    }

    /// Read the job from the process environment
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the job through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PipelineError::ConfigError(format!("{} is not set", key)))
        };

        let source_repo_url = required(ENV_REPOSITORY_URL)?;
        let deployment_id = required(ENV_DEPLOYMENT_ID)?;
        validate_slug(&deployment_id)?;

        let workspace = lookup(ENV_WORKSPACE)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            source_repo_url,
            deployment_id,
            workspace,
        })
    }

    /// Environment handed to the isolated build instance
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            (ENV_REPOSITORY_URL.to_string(), self.source_repo_url.clone()),
            (ENV_DEPLOYMENT_ID.to_string(), self.deployment_id.clone()),
        ]
    }
}
