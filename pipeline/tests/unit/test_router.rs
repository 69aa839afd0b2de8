//! Edge router tests against a mock artifact store

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceExt;

use shipit::router::edge_router;
use shipit::router::proxy::EdgeProxy;
use shipit::server::serve::serve_on;

/// Upstream that echoes the requested path and query
async fn upstream_handler(request: Request) -> Response {
    let path = request.uri().path().to_string();
    let target = match request.uri().query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.clone(),
    };

    match path.as_str() {
        "/__outputs/abc/missing.html" => (StatusCode::NOT_FOUND, "NoSuchKey").into_response(),
        "/__outputs/abc/moved" => (
            StatusCode::FOUND,
            [(header::LOCATION, "/__outputs/abc/index.html")],
        )
            .into_response(),
        "/__outputs/abc/upload" => {
            let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .unwrap();
            bytes.len().to_string().into_response()
        }
        _ => ([(header::CONTENT_TYPE, "text/html")], target).into_response(),
    }
}

async fn start_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(upstream_handler);
    let _server = serve_on("mock store", listener, app, futures::future::pending::<()>());
    format!("http://{}/__outputs", addr)
}

async fn proxied(router: Router, host: Option<&str>, uri: &str) -> (StatusCode, Response) {
    let mut builder = axum::http::Request::builder().uri(uri);
    if let Some(host) = host {
        builder = builder.header(header::HOST, host);
    }
    let response = router
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    (response.status(), response)
}

async fn text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn router() -> Router {
    let base = start_upstream().await;
    edge_router(Arc::new(EdgeProxy::new(&base).unwrap()))
}

#[tokio::test]
async fn test_root_serves_index_document() {
    let (status, response) = proxied(router().await, Some("abc.localhost:8000"), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/html"
    );
    assert_eq!(text(response).await, "/__outputs/abc/index.html");
}

#[tokio::test]
async fn test_paths_and_queries_pass_through() {
    let (status, response) =
        proxied(router().await, Some("abc.example.com"), "/assets/app.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text(response).await, "/__outputs/abc/assets/app.js");

    let (_, response) =
        proxied(router().await, Some("abc.example.com"), "/assets/app.js?v=2&x=1").await;
    assert_eq!(text(response).await, "/__outputs/abc/assets/app.js?v=2&x=1");
}

#[tokio::test]
async fn test_upstream_status_is_preserved() {
    let (status, response) =
        proxied(router().await, Some("abc.example.com"), "/missing.html").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(text(response).await, "NoSuchKey");

    let (status, response) = proxied(router().await, Some("abc.example.com"), "/moved").await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/__outputs/abc/index.html"
    );
}

#[tokio::test]
async fn test_missing_host_is_rejected() {
    let (status, _) = proxied(router().await, None, "/").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = proxied(router().await, Some("127.0.0.1:8000"), "/").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // bind then release a port so nothing listens on it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let proxy = EdgeProxy::new(&format!("http://{}/__outputs", addr)).unwrap();
    let (status, _) = proxied(edge_router(Arc::new(proxy)), Some("abc.example.com"), "/").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_dot_segments_never_leave_the_deployment() {
    for uri in [
        "/../../private/key.txt",
        "/assets/../../other/index.html",
        "/%2e%2e/other/index.html",
        "/./index.html",
    ] {
        let (status, _) = proxied(router().await, Some("abc.example.com"), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn test_request_body_is_forwarded() {
    let body = vec![b'x'; 1024 * 1024];
    let request = axum::http::Request::builder()
        .method("PUT")
        .uri("/upload")
        .header(header::HOST, "abc.example.com")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();

    let response = router().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text(response).await, "1048576");
}
