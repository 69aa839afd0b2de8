//! Edge router: serve deployment artifacts by subdomain

pub mod proxy;
pub mod resolve;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::router::proxy::{proxy_handler, EdgeProxy};

/// Edge router routes: every request is proxied
pub fn edge_router(proxy: Arc<EdgeProxy>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .with_state(proxy)
        .layer(TraceLayer::new_for_http())
}
