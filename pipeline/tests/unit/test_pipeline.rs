//! End-to-end: dispatch a build, watch its logs live, serve its status

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, TryStreamExt};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use shipit::bus::memory::MemoryBus;
use shipit::bus::{BuildMessage, BuildStatus, LogBus};
use shipit::deploy::executor::{BuildExecutor, BuilderOptions, BUILD_COMPLETE, BUILD_STARTED};
use shipit::deploy::fsm::DeploymentStatus;
use shipit::deploy::job::BuildJob;
use shipit::dispatch::runner::TaskRunner;
use shipit::dispatch::service::{DispatchOptions, DispatchService};
use shipit::errors::PipelineError;
use shipit::filesys::dir::Dir;
use shipit::gateway::gateway_router;
use shipit::gateway::groups::Groups;
use shipit::gateway::socket::Frame;
use shipit::models::deployment::Deployment;
use shipit::server::serve::serve_on;
use shipit::storage::blob::ObjectBlobStore;
use shipit::storage::records::DeploymentRecords;
use shipit::utils::RetryPolicy;
use shipit::workers::{relay, status};

const SITE_BUILD: &str = "mkdir -p dist/assets \
    && echo '<html>demo</html>' > dist/index.html \
    && echo 'console.log(1)' > dist/assets/app.js";

/// Runs the build executor in-process once the test opens the gate
struct InProcessRunner {
    bus: Arc<MemoryBus>,
    store: Arc<ObjectBlobStore>,
    workspaces: PathBuf,
    build_command: String,
    gate: Arc<Notify>,
}

#[async_trait]
impl TaskRunner for InProcessRunner {
    async fn start(&self, job: &BuildJob) -> Result<(), PipelineError> {
        let workspace = self.workspaces.join(&job.deployment_id);
        std::fs::create_dir_all(workspace.join("output"))?;

        let mut job = job.clone();
        job.workspace = Some(workspace.clone());

        let options = BuilderOptions {
            workspace_dir: workspace,
            source_dir: "output".to_string(),
            output_dir: "dist".to_string(),
            install_command: String::new(),
            build_command: self.build_command.clone(),
            clone_source: false,
            fail_on_nonzero_exit: true,
            upload_retry: RetryPolicy::none(),
        };
        let executor = BuildExecutor::new(self.bus.clone(), self.store.clone(), options);
        let gate = self.gate.clone();

        tokio::spawn(async move {
            gate.notified().await;
            executor.run_without_close(&job).await;
        });
        Ok(())
    }
}

struct Pipeline {
    _tmp: tempfile::TempDir,
    service: Arc<DispatchService>,
    memory: Arc<InMemory>,
    gateway: String,
    gate: Arc<Notify>,
}

async fn start_pipeline(build_command: &str) -> Pipeline {
    let tmp = tempfile::tempdir().unwrap();
    let bus = Arc::new(MemoryBus::default());
    let memory = Arc::new(InMemory::new());
    let store = Arc::new(ObjectBlobStore::new(memory.clone(), "__outputs"));
    let records = Arc::new(DeploymentRecords::new(Dir::new(tmp.path().join("deployments"))));
    let groups = Arc::new(Groups::new());
    let gate = Arc::new(Notify::new());

    let subscription = bus.subscribe_logs().await.unwrap();
    let tracked = records.clone();
    tokio::spawn(async move {
        status::run(subscription, tracked, Box::pin(futures::future::pending::<()>())).await;
    });

    let subscription = bus.subscribe_logs().await.unwrap();
    let relay_groups = groups.clone();
    tokio::spawn(async move {
        relay::run(subscription, relay_groups, Box::pin(futures::future::pending::<()>())).await;
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gateway = format!("ws://{}/ws", listener.local_addr().unwrap());
    let _server = serve_on(
        "realtime gateway",
        listener,
        gateway_router(groups),
        futures::future::pending::<()>(),
    );

    let runner = Arc::new(InProcessRunner {
        bus,
        store,
        workspaces: tmp.path().join("workspaces"),
        build_command: build_command.to_string(),
        gate: gate.clone(),
    });
    let service = Arc::new(DispatchService::new(
        runner,
        records,
        DispatchOptions {
            retry: RetryPolicy::none(),
            ..Default::default()
        },
    ));

    Pipeline {
        _tmp: tmp,
        service,
        memory,
        gateway,
        gate,
    }
}

/// Subscribe to a deployment's logs, open the build gate and collect every
/// payload up to the terminal status
async fn watch_build(pipeline: &Pipeline, id: &str) -> Vec<BuildMessage> {
    let (mut client, _) = connect_async(pipeline.gateway.as_str()).await.unwrap();
    let subscribe = serde_json::to_string(&Frame::subscribe(&format!("logs:{}", id))).unwrap();
    client.send(Message::Text(subscribe.into())).await.unwrap();

    let mut joined = false;
    let mut messages = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), client.next())
            .await
            .expect("timed out waiting for build logs")
            .expect("gateway closed the connection")
            .unwrap();
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Frame = serde_json::from_str(text.as_str()).unwrap();

        if !joined {
            assert_eq!(frame.data, format!("Joined logs:{}", id));
            joined = true;
            pipeline.gate.notify_one();
            continue;
        }

        let parsed = BuildMessage::parse(&frame.data).expect("unknown payload");
        let done = matches!(parsed, BuildMessage::Status { .. });
        messages.push(parsed);
        if done {
            return messages;
        }
    }
}

async fn wait_for_terminal(service: &DispatchService, id: &str) -> Deployment {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let record = service.get(id).await.unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("deployment never reached a terminal status")
}

#[tokio::test]
async fn test_deploy_watch_and_track() {
    let pipeline = start_pipeline(SITE_BUILD).await;

    let submission = pipeline
        .service
        .submit("https://git.example/demo.git", None)
        .await
        .unwrap();
    assert_eq!(
        pipeline.service.get(&submission.id).await.unwrap().status,
        DeploymentStatus::Queued
    );

    let messages = watch_build(&pipeline, &submission.id).await;
    let lines: Vec<&str> = messages
        .iter()
        .filter_map(|m| match m {
            BuildMessage::Log { log } => Some(log.as_str()),
            _ => None,
        })
        .collect();

    assert_eq!(lines.first(), Some(&BUILD_STARTED));
    let first_complete = lines.iter().position(|l| *l == BUILD_COMPLETE).unwrap();
    let uploading = lines.iter().position(|l| *l == "Uploading files").unwrap();
    assert!(first_complete < uploading);
    assert_eq!(lines.last(), Some(&BUILD_COMPLETE));
    assert_eq!(
        messages.last(),
        Some(&BuildMessage::Status {
            status: BuildStatus::Succeeded,
            error: None,
            files: 2,
        })
    );

    let prefix = ObjectPath::from(format!("__outputs/{}", submission.id));
    let mut keys: Vec<String> = pipeline
        .memory
        .list(Some(&prefix))
        .map_ok(|meta| meta.location.to_string())
        .try_collect()
        .await
        .unwrap();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            format!("__outputs/{}/assets/app.js", submission.id),
            format!("__outputs/{}/index.html", submission.id),
        ]
    );

    let record = wait_for_terminal(&pipeline.service, &submission.id).await;
    assert_eq!(record.status, DeploymentStatus::Ready);
    assert_eq!(record.error, None);
}

#[tokio::test]
async fn test_failed_build_is_tracked() {
    let pipeline = start_pipeline("echo compiling && exit 2").await;

    let submission = pipeline
        .service
        .submit("https://git.example/broken.git", Some("broken"))
        .await
        .unwrap();

    let messages = watch_build(&pipeline, "broken").await;
    assert!(messages.contains(&BuildMessage::log("compiling")));
    assert!(matches!(
        messages.last(),
        Some(BuildMessage::Status {
            status: BuildStatus::Failed,
            files: 0,
            ..
        })
    ));

    let record = wait_for_terminal(&pipeline.service, &submission.id).await;
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert!(record.error.is_some());
}
