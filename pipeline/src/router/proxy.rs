//! Reverse proxy from subdomains to the artifact namespace

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use reqwest::redirect::Policy;
use reqwest::Url;
use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::router::resolve::{deployment_id_from_host, upstream_url};

/// Headers scoped to a single connection, never forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy end-to-end headers
fn forward_headers(from: &HeaderMap, to: &mut HeaderMap, skip_host: bool) {
    for (name, value) in from {
        if is_hop_by_hop(name) || (skip_host && name == header::HOST) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

fn invalid_url(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::ValidationError(format!("invalid upstream url: {}", e))
}

/// Stateless edge proxy
pub struct EdgeProxy {
    client: reqwest::Client,
    upstream_base: String,
}

impl EdgeProxy {
    pub fn new(upstream_base: &str) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            upstream_base: upstream_base.trim_end_matches('/').to_string(),
        })
    }

    /// Parsed upstream URL, checked to still lie under `<base>/<id>/`
    fn contained_url(
        &self,
        deployment_id: &str,
        path: &str,
        query: Option<&str>,
    ) -> Result<Url, PipelineError> {
        let escapes = || {
            PipelineError::ValidationError(format!("path '{}' escapes the deployment", path))
        };

        let raw = upstream_url(&self.upstream_base, deployment_id, path, query)
            .ok_or_else(escapes)?;
        let url = Url::parse(&raw).map_err(invalid_url)?;
        let prefix = Url::parse(&format!("{}/{}/", self.upstream_base, deployment_id))
            .map_err(invalid_url)?;

        if url.as_str().starts_with(prefix.as_str()) {
            Ok(url)
        } else {
            Err(escapes())
        }
    }

    async fn forward(&self, request: Request) -> Result<Response, PipelineError> {
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| request.uri().host())
            .ok_or_else(|| PipelineError::ValidationError("missing Host header".to_string()))?;

        let deployment_id = deployment_id_from_host(host).ok_or_else(|| {
            PipelineError::ValidationError(format!("no deployment subdomain in host '{}'", host))
        })?;

        let url = self.contained_url(deployment_id, request.uri().path(), request.uri().query())?;
        debug!("Proxying {} {} -> {}", request.method(), host, url);

        let (parts, body) = request.into_parts();
        let has_body = parts.headers.contains_key(header::CONTENT_LENGTH)
            || parts.headers.contains_key(header::TRANSFER_ENCODING);

        let mut headers = HeaderMap::new();
        forward_headers(&parts.headers, &mut headers, true);

        let mut upstream_request = self
            .client
            .request(parts.method, url.clone())
            .headers(headers);
        if has_body {
            upstream_request =
                upstream_request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = upstream_request.send().await.map_err(|e| {
            warn!("Upstream {} unreachable: {}", url, e);
            PipelineError::RoutingError(format!("upstream unreachable: {}", e))
        })?;

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        forward_headers(&upstream_headers, response.headers_mut(), false);
        Ok(response)
    }
}

/// Fallback handler proxying every request
pub async fn proxy_handler(State(proxy): State<Arc<EdgeProxy>>, request: Request) -> Response {
    match proxy.forward(request).await {
        Ok(response) => response,
        Err(PipelineError::ValidationError(message)) => {
            (StatusCode::BAD_REQUEST, message).into_response()
        }
        Err(e) => e.into_response(),
    }
}
