//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::bus::LogBus;
use crate::dispatch::runner::{HttpTaskRunner, ProcessTaskRunner, TaskRunner};
use crate::dispatch::service::DispatchService;
use crate::errors::PipelineError;
use crate::gateway::groups::Groups;
use crate::mqtt::client::MqttBus;
use crate::storage::records::DeploymentRecords;
use crate::storage::settings::TaskRunnerKind;

/// Process-wide handles shared by the services
pub struct AppState {
    /// Log bus connection
    pub bus: Arc<dyn LogBus>,

    /// Deployment records
    pub records: Arc<DeploymentRecords>,

    /// Dispatch service
    pub dispatch: Arc<DispatchService>,

    /// Realtime gateway client groups
    pub groups: Arc<Groups>,
}

impl AppState {
    /// Assemble the state from already created handles
    pub fn new(
        bus: Arc<dyn LogBus>,
        records: Arc<DeploymentRecords>,
        runner: Arc<dyn TaskRunner>,
        options: &AppOptions,
    ) -> Self {
        let dispatch = Arc::new(DispatchService::new(
            runner,
            records.clone(),
            options.dispatch.clone(),
        ));
        Self {
            bus,
            records,
            dispatch,
            groups: Arc::new(Groups::new()),
        }
    }

    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, PipelineError> {
        info!("Initializing application state...");

        options.layout.setup().await?;

        let bus: Arc<dyn LogBus> = Arc::new(MqttBus::connect(&options.bus)?);
        let records = Arc::new(DeploymentRecords::new(options.layout.deployments_dir()));

        let runner: Arc<dyn TaskRunner> = match options.task_runner.kind {
            TaskRunnerKind::Http => {
                info!("Using HTTP task runner at {}", options.task_runner.endpoint);
                Arc::new(HttpTaskRunner::from_settings(&options.task_runner)?)
            }
            TaskRunnerKind::Process => {
                info!("Using local process task runner");
                Arc::new(ProcessTaskRunner::from_settings(
                    &options.task_runner,
                    options.config_path.clone(),
                    options.layout.workspaces_dir(),
                )?)
            }
        };

        Ok(Self::new(bus, records, runner, options))
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        info!("Shutting down application state...");
        self.bus.close().await
    }
}
