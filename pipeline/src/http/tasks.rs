//! Task runner API client

use openapi_client::models::{RunTaskRequest, RunTaskResponse};

use crate::errors::PipelineError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Ask the scheduler to start task instances
    pub async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse, PipelineError> {
        self.post("/tasks", request).await
    }
}
