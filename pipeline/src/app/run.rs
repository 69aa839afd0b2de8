//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::PipelineError;
use crate::gateway::gateway_router;
use crate::router::edge_router;
use crate::router::proxy::EdgeProxy;
use crate::server::serve::{dispatch_router, serve};
use crate::server::state::ServerState;
use crate::workers::{relay, status};

/// Run the pipeline services until the shutdown signal resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PipelineError> {
    info!("Initializing shipit services...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start services: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

fn shutdown_future(
    shutdown_tx: &broadcast::Sender<()>,
) -> impl Future<Output = ()> + Send + 'static {
    let mut shutdown_rx = shutdown_tx.subscribe();
    async move {
        let _ = shutdown_rx.recv().await;
    }
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), PipelineError> {
    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    // workers subscribe before any server accepts requests
    if options.enable_status_tracker {
        init_status_tracker(app_state.clone(), shutdown_tx, shutdown_manager).await?;
    }

    if options.enable_realtime_gateway {
        init_realtime_gateway(options, app_state.clone(), shutdown_tx, shutdown_manager).await?;
    }

    if options.enable_dispatch_server {
        init_dispatch_server(options, app_state.clone(), shutdown_tx, shutdown_manager).await?;
    }

    if options.enable_edge_router {
        init_edge_router(options, shutdown_tx, shutdown_manager).await?;
    }

    Ok(())
}

async fn init_status_tracker(
    app_state: Arc<AppState>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), PipelineError> {
    info!("Initializing status tracker worker...");

    let subscription = app_state.bus.subscribe_logs().await?;
    let records = app_state.records.clone();
    let shutdown = shutdown_future(shutdown_tx);

    let handle = tokio::spawn(async move {
        status::run(subscription, records, Box::pin(shutdown)).await;
    });

    shutdown_manager.with_status_worker_handle(handle)?;
    Ok(())
}

async fn init_realtime_gateway(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), PipelineError> {
    info!("Initializing realtime gateway...");

    let subscription = app_state.bus.subscribe_logs().await?;
    let groups = app_state.groups.clone();
    let shutdown = shutdown_future(shutdown_tx);

    let relay_handle = tokio::spawn(async move {
        relay::run(subscription, groups, Box::pin(shutdown)).await;
    });
    shutdown_manager.with_relay_worker_handle(relay_handle)?;

    let server_handle = serve(
        "realtime gateway",
        &options.gateway_server,
        gateway_router(app_state.groups.clone()),
        shutdown_future(shutdown_tx),
    )
    .await?;
    shutdown_manager.with_gateway_server_handle(server_handle)?;
    Ok(())
}

async fn init_dispatch_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), PipelineError> {
    info!("Initializing dispatch server...");

    let server_state = Arc::new(ServerState::new(app_state.dispatch.clone()));
    let handle = serve(
        "dispatch server",
        &options.dispatch_server,
        dispatch_router(server_state),
        shutdown_future(shutdown_tx),
    )
    .await?;

    shutdown_manager.with_dispatch_server_handle(handle)?;
    Ok(())
}

async fn init_edge_router(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), PipelineError> {
    info!(
        "Initializing edge router for {}...",
        options.router_upstream_base
    );

    let proxy = Arc::new(EdgeProxy::new(&options.router_upstream_base)?);
    let handle = serve(
        "edge router",
        &options.router_server,
        edge_router(proxy),
        shutdown_future(shutdown_tx),
    )
    .await?;

    shutdown_manager.with_router_server_handle(handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

type ServerHandle = JoinHandle<Result<(), PipelineError>>;

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    dispatch_server_handle: Option<ServerHandle>,
    gateway_server_handle: Option<ServerHandle>,
    router_server_handle: Option<ServerHandle>,
    relay_worker_handle: Option<JoinHandle<()>>,
    status_worker_handle: Option<JoinHandle<()>>,
}

fn already_set(name: &str) -> PipelineError {
    PipelineError::ShutdownError(format!("{} already set", name))
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            dispatch_server_handle: None,
            gateway_server_handle: None,
            router_server_handle: None,
            relay_worker_handle: None,
            status_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), PipelineError> {
        if self.app_state.is_some() {
            return Err(already_set("app_state"));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_dispatch_server_handle(&mut self, handle: ServerHandle) -> Result<(), PipelineError> {
        if self.dispatch_server_handle.is_some() {
            return Err(already_set("dispatch_server_handle"));
        }
        self.dispatch_server_handle = Some(handle);
        Ok(())
    }

    pub fn with_gateway_server_handle(&mut self, handle: ServerHandle) -> Result<(), PipelineError> {
        if self.gateway_server_handle.is_some() {
            return Err(already_set("gateway_server_handle"));
        }
        self.gateway_server_handle = Some(handle);
        Ok(())
    }

    pub fn with_router_server_handle(&mut self, handle: ServerHandle) -> Result<(), PipelineError> {
        if self.router_server_handle.is_some() {
            return Err(already_set("router_server_handle"));
        }
        self.router_server_handle = Some(handle);
        Ok(())
    }

    pub fn with_relay_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), PipelineError> {
        if self.relay_worker_handle.is_some() {
            return Err(already_set("relay_worker_handle"));
        }
        self.relay_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_status_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), PipelineError> {
        if self.status_worker_handle.is_some() {
            return Err(already_set("status_worker_handle"));
        }
        self.status_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), PipelineError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}",
                    self.lifecycle_options.max_shutdown_delay
                );
                Err(PipelineError::ShutdownError(format!(
                    "timed out after {:?}",
                    self.lifecycle_options.max_shutdown_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), PipelineError> {
        info!("Shutting down shipit services...");

        let join_err = |e: tokio::task::JoinError| PipelineError::ShutdownError(e.to_string());

        // 1. Workers
        if let Some(handle) = self.relay_worker_handle.take() {
            handle.await.map_err(join_err)?;
        }
        if let Some(handle) = self.status_worker_handle.take() {
            handle.await.map_err(join_err)?;
        }

        // 2. Servers
        for handle in [
            self.dispatch_server_handle.take(),
            self.gateway_server_handle.take(),
            self.router_server_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.await.map_err(join_err)??;
        }

        // 3. App state, closing the bus last
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
