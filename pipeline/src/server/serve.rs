//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::PipelineError;
use crate::server::handlers::{
    create_project_handler, get_project_handler, health_handler, version_handler,
};
use crate::server::state::ServerState;

/// Dispatch API routes
pub fn dispatch_router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Projects
        .route("/project", post(create_project_handler))
        .route("/project/{slug}", get(get_project_handler))
        // State and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured address
pub async fn bind(options: &ServerOptions) -> Result<TcpListener, PipelineError> {
    let addr = format!("{}:{}", options.host, options.port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| PipelineError::ServerError(format!("failed to bind {}: {}", addr, e)))
}

/// Serve `app` on a bound listener until the shutdown signal resolves
pub fn serve_on(
    name: &str,
    listener: TcpListener,
    app: Router,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> JoinHandle<Result<(), PipelineError>> {
    match listener.local_addr() {
        Ok(addr) => info!("Starting {} on {}", name, addr),
        Err(_) => info!("Starting {}", name),
    }

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| PipelineError::ServerError(e.to_string()))
    })
}

/// Start an HTTP server on the configured address
pub async fn serve(
    name: &str,
    options: &ServerOptions,
    app: Router,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), PipelineError>>, PipelineError> {
    let listener = bind(options).await?;
    Ok(serve_on(name, listener, app, shutdown_signal))
}
