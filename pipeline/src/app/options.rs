//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::service::DispatchOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{BusSettings, Settings, TaskRunnerSettings};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Settings file the process was started with, handed to local builders
    pub config_path: Option<PathBuf>,

    /// Enable the dispatch HTTP API
    pub enable_dispatch_server: bool,

    /// Enable the realtime gateway and its log relay
    pub enable_realtime_gateway: bool,

    /// Enable the edge router
    pub enable_edge_router: bool,

    /// Enable the status tracker worker
    pub enable_status_tracker: bool,

    pub dispatch_server: ServerOptions,
    pub gateway_server: ServerOptions,
    pub router_server: ServerOptions,

    /// Dispatch service options
    pub dispatch: DispatchOptions,

    pub task_runner: TaskRunnerSettings,
    pub bus: BusSettings,

    /// HTTP base of the artifact namespace the edge router proxies to
    pub router_upstream_base: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default(), None)
    }
}

impl AppOptions {
    /// Derive options from a settings file
    pub fn from_settings(
        settings: &Settings,
        layout: StorageLayout,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            config_path,
            enable_dispatch_server: settings.enable_dispatch_server,
            enable_realtime_gateway: settings.enable_realtime_gateway,
            enable_edge_router: settings.enable_edge_router,
            enable_status_tracker: settings.enable_status_tracker,
            dispatch_server: ServerOptions::new(&settings.dispatch.host, settings.dispatch.port),
            gateway_server: ServerOptions::new(&settings.gateway.host, settings.gateway.port),
            router_server: ServerOptions::new(&settings.router.host, settings.router.port),
            dispatch: DispatchOptions::from(&settings.dispatch),
            task_runner: settings.task_runner.clone(),
            bus: settings.bus.clone(),
            router_upstream_base: settings.router_upstream_base(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl ServerOptions {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new("127.0.0.1", 9000)
    }
}
