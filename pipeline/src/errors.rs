//! Error types for the shipit pipeline

use thiserror::Error;

/// Main error type for the pipeline services and the build executor
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The task runner refused to start a build instance
    #[error("Dispatch error: {0}")]
    DispatchError(String),

    /// A fault inside the build executor
    #[error("Build error: {0}")]
    BuildError(String),

    /// A single object write failed
    #[error("Upload error: {key}: {message}")]
    UploadError { key: String, message: String },

    /// The edge router could not reach the blob store
    #[error("Routing error: {0}")]
    RoutingError(String),

    #[error("Log bus error: {0}")]
    BusError(String),

    #[error("Blob store error: {0}")]
    StoreError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether repeating the failed operation is safe. An HTTP request that
    /// got past connecting may already have taken effect remotely.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::HttpError(e) => e.is_connect(),
            _ => true,
        }
    }
}

impl From<object_store::Error> for PipelineError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => PipelineError::NotFound(path),
            other => PipelineError::StoreError(other.to_string()),
        }
    }
}
