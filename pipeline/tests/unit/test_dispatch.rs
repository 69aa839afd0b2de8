//! Dispatch service and HTTP API tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use shipit::deploy::fsm::DeploymentStatus;
use shipit::deploy::job::BuildJob;
use shipit::dispatch::runner::{HttpTaskRunner, TaskRunner};
use shipit::dispatch::service::{DispatchOptions, DispatchService};
use shipit::errors::PipelineError;
use shipit::filesys::dir::Dir;
use shipit::http::client::HttpClient;
use shipit::ids::validate_slug;
use shipit::models::deployment::Deployment;
use shipit::server::serve::dispatch_router;
use shipit::server::state::ServerState;
use shipit::storage::records::DeploymentRecords;
use shipit::utils::{CooldownOptions, RetryPolicy};

/// Task runner that rejects the first `rejections` start requests
#[derive(Default)]
struct MockRunner {
    rejections: AtomicU32,
    attempts: AtomicU32,
    delay: Duration,
    accepted: Mutex<Vec<BuildJob>>,
}

impl MockRunner {
    fn rejecting(rejections: u32) -> Self {
        Self {
            rejections: AtomicU32::new(rejections),
            ..Default::default()
        }
    }

    fn accepted(&self) -> Vec<BuildJob> {
        self.accepted.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskRunner for MockRunner {
    async fn start(&self, job: &BuildJob) -> Result<(), PipelineError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let remaining = self.rejections.load(Ordering::SeqCst);
        if remaining > 0 {
            self.rejections.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::DispatchError("capacity exceeded".to_string()));
        }
        self.accepted.lock().unwrap().push(job.clone());
        Ok(())
    }
}

fn fast_options() -> DispatchOptions {
    DispatchOptions {
        retry: RetryPolicy {
            max_attempts: 3,
            cooldown: CooldownOptions {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
        },
        ..Default::default()
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    runner: Arc<MockRunner>,
    service: Arc<DispatchService>,
}

fn fixture(runner: MockRunner) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let records = Arc::new(DeploymentRecords::new(Dir::new(tmp.path().join("deployments"))));
    let runner = Arc::new(runner);
    let service = Arc::new(DispatchService::new(runner.clone(), records, fast_options()));
    Fixture {
        _tmp: tmp,
        runner,
        service,
    }
}

#[tokio::test]
async fn test_submit_generates_id_and_serving_url() {
    let f = fixture(MockRunner::default());

    let submission = f
        .service
        .submit("https://git.example/repo.git", None)
        .await
        .unwrap();

    validate_slug(&submission.id).unwrap();
    assert_eq!(
        submission.serving_url,
        format!("http://{}.localhost:8000", submission.id)
    );

    let accepted = f.runner.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].deployment_id, submission.id);
    assert_eq!(accepted[0].source_repo_url, "https://git.example/repo.git");

    let record = f.service.get(&submission.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Queued);
}

#[tokio::test]
async fn test_submit_uses_provided_slug() {
    let f = fixture(MockRunner::default());

    let submission = f
        .service
        .submit("https://git.example/repo.git", Some("my-site"))
        .await
        .unwrap();
    assert_eq!(submission.id, "my-site");
    assert_eq!(submission.serving_url, "http://my-site.localhost:8000");
}

#[tokio::test]
async fn test_generated_ids_differ() {
    let f = fixture(MockRunner::default());

    let a = f.service.submit("https://git.example/a.git", None).await.unwrap();
    let b = f.service.submit("https://git.example/a.git", None).await.unwrap();
    assert_ne!(a.id, b.id);
}

#[tokio::test]
async fn test_rejection_fails_without_record() {
    let f = fixture(MockRunner::rejecting(u32::MAX));

    let err = f
        .service
        .submit("https://git.example/repo.git", Some("site"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::DispatchError(_)));
    assert_eq!(f.runner.attempts.load(Ordering::SeqCst), 3);
    assert!(matches!(
        f.service.get("site").await,
        Err(PipelineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_transient_rejection_is_retried() {
    let f = fixture(MockRunner::rejecting(1));

    f.service
        .submit("https://git.example/repo.git", Some("site"))
        .await
        .unwrap();

    assert_eq!(f.runner.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(f.runner.accepted().len(), 1);
}

#[tokio::test]
async fn test_concurrent_submits_of_one_id_keep_accepted_record() {
    let f = fixture(MockRunner {
        delay: Duration::from_millis(20),
        ..MockRunner::rejecting(3)
    });

    let (first, second) = tokio::join!(
        f.service.submit("https://git.example/a.git", Some("site")),
        f.service.submit("https://git.example/b.git", Some("site")),
    );

    assert!(matches!(first, Err(PipelineError::DispatchError(_))));
    assert_eq!(second.unwrap().id, "site");

    let record = f.service.get("site").await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Queued);
    assert_eq!(record.source_repo_url, "https://git.example/b.git");
}

#[tokio::test]
async fn test_invalid_input_never_reaches_runner() {
    let f = fixture(MockRunner::default());

    let err = f
        .service
        .submit("https://git.example/repo.git", Some("Bad_Slug"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ValidationError(_)));

    let err = f.service.submit("   ", None).await.unwrap_err();
    assert!(matches!(err, PipelineError::ValidationError(_)));

    assert_eq!(f.runner.attempts.load(Ordering::SeqCst), 0);
}

// ================================= HTTP API ===================================== //

fn app(f: &Fixture) -> axum::Router {
    dispatch_router(Arc::new(ServerState::new(f.service.clone())))
}

fn post_project(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/project")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_post_project_returns_queued() {
    let f = fixture(MockRunner::default());

    let response = app(&f)
        .oneshot(post_project(r#"{"gitUrl":"https://git.example/repo.git"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "queued");
    let slug = body["data"]["projectSlug"].as_str().unwrap().to_string();
    assert_eq!(
        body["data"]["url"],
        format!("http://{}.localhost:8000", slug)
    );
}

#[tokio::test]
async fn test_get_project_returns_record() {
    let f = fixture(MockRunner::default());
    f.service
        .submit("https://git.example/repo.git", Some("site"))
        .await
        .unwrap();

    let response = app(&f)
        .oneshot(Request::builder().uri("/project/site").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["id"], "site");
    assert_eq!(body["status"], "queued");
    assert_eq!(body["sourceRepoUrl"], "https://git.example/repo.git");
    assert_eq!(body["url"], "http://site.localhost:8000");
}

#[tokio::test]
async fn test_error_statuses() {
    let f = fixture(MockRunner::default());

    let response = app(&f)
        .oneshot(Request::builder().uri("/project/ghost").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "not_found");

    // a record-shaped file next to the records dir stays unreachable
    let outside = Deployment::queued("outside", "https://internal/secret.git");
    std::fs::write(
        f._tmp.path().join("outside.json"),
        serde_json::to_vec(&outside).unwrap(),
    )
    .unwrap();
    let response = app(&f)
        .oneshot(
            Request::builder()
                .uri("/project/..%2Foutside")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(&f).oneshot(post_project("{not json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "validation_error");

    let rejecting = fixture(MockRunner::rejecting(u32::MAX));
    let response = app(&rejecting)
        .oneshot(post_project(r#"{"gitUrl":"https://git.example/repo.git"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"], "dispatch_error");
}

#[tokio::test]
async fn test_health() {
    let f = fixture(MockRunner::default());
    let response = app(&f)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");
}

/// Scheduler stand-in counting `POST /tasks` calls
#[derive(Default)]
struct Scheduler {
    hits: AtomicU32,
    unavailable: AtomicU32,
    stall: Duration,
}

async fn run_task(
    axum::extract::State(scheduler): axum::extract::State<Arc<Scheduler>>,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    scheduler.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(scheduler.stall).await;
    let unavailable = scheduler.unavailable.load(Ordering::SeqCst);
    if unavailable > 0 {
        scheduler.unavailable.store(unavailable - 1, Ordering::SeqCst);
        return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
    }
    axum::Json(serde_json::json!({ "tasks": ["t1"] })).into_response()
}

async fn scheduler_service(
    scheduler: Arc<Scheduler>,
    timeout: Duration,
) -> (tempfile::TempDir, DispatchService) {
    let app = axum::Router::new()
        .route("/tasks", axum::routing::post(run_task))
        .with_state(scheduler);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    let client = HttpClient::with_timeout(&format!("http://{}", addr), timeout).unwrap();
    let runner = Arc::new(HttpTaskRunner::new(client, "builder-task"));
    let tmp = tempfile::tempdir().unwrap();
    let records = Arc::new(DeploymentRecords::new(Dir::new(tmp.path().join("deployments"))));
    (tmp, DispatchService::new(runner, records, fast_options()))
}

#[tokio::test]
async fn test_timed_out_start_is_not_repeated() {
    let scheduler = Arc::new(Scheduler {
        stall: Duration::from_secs(2),
        ..Default::default()
    });
    let (_tmp, service) = scheduler_service(scheduler.clone(), Duration::from_millis(100)).await;

    let err = service
        .submit("https://git.example/repo.git", Some("site"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::DispatchError(_)));
    assert_eq!(scheduler.hits.load(Ordering::SeqCst), 1);
    assert!(matches!(service.get("site").await, Err(PipelineError::NotFound(_))));
}

#[tokio::test]
async fn test_unavailable_scheduler_is_retried() {
    let scheduler = Arc::new(Scheduler {
        unavailable: AtomicU32::new(2),
        ..Default::default()
    });
    let (_tmp, service) = scheduler_service(scheduler.clone(), Duration::from_secs(5)).await;

    let submission = service
        .submit("https://git.example/repo.git", Some("site"))
        .await
        .unwrap();

    assert_eq!(submission.id, "site");
    assert_eq!(scheduler.hits.load(Ordering::SeqCst), 3);
}
