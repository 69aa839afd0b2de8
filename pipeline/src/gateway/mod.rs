//! Realtime gateway: rebroadcast log bus messages to WebSocket clients

pub mod groups;
pub mod socket;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::gateway::groups::Groups;
use crate::gateway::socket::ws_handler;
use crate::server::handlers::health_handler;

/// Gateway routes
pub fn gateway_router(groups: Arc<Groups>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .with_state(groups)
        .layer(TraceLayer::new_for_http())
}
