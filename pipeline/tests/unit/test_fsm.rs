//! Deployment status FSM tests

use shipit::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
use shipit::models::deployment::Deployment;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentStatus::Queued);
    assert!(fsm.error().is_none());
    assert!(!fsm.state().is_terminal());
}

#[test]
fn test_fsm_build_success_flow() {
    let mut fsm = DeploymentFsm::new();

    // Queued -> Building
    fsm.process(DeploymentEvent::BuildStarted).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Building);

    // Building -> Ready
    fsm.process(DeploymentEvent::BuildSucceeded).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Ready);
}

#[test]
fn test_fsm_build_failure_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::BuildStarted).unwrap();
    fsm.process(DeploymentEvent::BuildFailed("exit status 1".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("exit status 1"));
}

#[test]
fn test_fsm_terminal_status_without_start() {
    let mut fsm = DeploymentFsm::new();
    assert!(fsm.process(DeploymentEvent::BuildSucceeded).unwrap());
    assert_eq!(fsm.state(), DeploymentStatus::Ready);
}

#[test]
fn test_fsm_redeploy_clears_error() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::BuildFailed("boom".to_string()))
        .unwrap();

    assert!(fsm.process(DeploymentEvent::Redeploy).unwrap());
    assert_eq!(fsm.state(), DeploymentStatus::Queued);
    assert!(fsm.error().is_none());

    // Re-queueing a queued deployment is a no-op
    assert!(!fsm.process(DeploymentEvent::Redeploy).unwrap());
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::BuildSucceeded).unwrap();

    assert!(fsm.process(DeploymentEvent::BuildStarted).is_err());
    assert!(fsm
        .process(DeploymentEvent::BuildFailed("late".to_string()))
        .is_err());
    assert_eq!(fsm.state(), DeploymentStatus::Ready);
}

#[test]
fn test_deployment_record_tracks_transitions() {
    let mut deployment = Deployment::queued("calm-otter", "https://git.example/repo.git");
    let created = deployment.updated_at;

    assert!(deployment.apply(DeploymentEvent::BuildStarted).unwrap());
    assert_eq!(deployment.status, DeploymentStatus::Building);
    assert!(deployment.updated_at >= created);

    deployment
        .apply(DeploymentEvent::BuildFailed("upload aborted".to_string()))
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(deployment.error.as_deref(), Some("upload aborted"));
}

#[test]
fn test_status_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&DeploymentStatus::Building).unwrap(),
        "\"building\""
    );
    assert_eq!(DeploymentStatus::Ready.to_string(), "ready");
}
