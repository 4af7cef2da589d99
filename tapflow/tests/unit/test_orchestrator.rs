use tapflow::engine::RunStatus;
use tapflow::errors::FlowError;
use tapflow::models::job::{ExecutionMode, JobOptions, JobState};

use crate::fakes::setup;

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_create_job_rejects_empty_workflow_list() {
    let s = setup();
    let err = s
        .orchestrator
        .create_job("dev-1", vec![], JobOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::ValidationError(_)));
    assert!(s.api.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_job_rejects_parallel_mode() {
    let s = setup();
    let options = JobOptions {
        execution_mode: ExecutionMode::Parallel,
        ..Default::default()
    };
    let err = s
        .orchestrator
        .create_job("dev-1", ids(&["login"]), options)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::ValidationError(_)));
}

#[tokio::test]
async fn test_create_job_rejects_unknown_device() {
    let s = setup();
    let err = s
        .orchestrator
        .create_job("dev-9", ids(&["login"]), JobOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotFound(_)));
}

#[tokio::test]
async fn test_job_runs_workflows_in_order() {
    let s = setup();
    let options = JobOptions {
        data_collection_id: Some("contacts".to_string()),
        ..Default::default()
    };
    let job_id = s
        .orchestrator
        .create_job("dev-1", ids(&["login", "logout"]), options)
        .await
        .unwrap();
    assert_eq!(
        s.orchestrator.status(&job_id).unwrap().state,
        JobState::Pending
    );

    let request = s.api.created.lock().unwrap()[0].clone();
    assert_eq!(request.flow_ids, ids(&["login", "logout"]));
    assert_eq!(request.data_collection_id.as_deref(), Some("contacts"));

    let status = s.orchestrator.run_job(&job_id).await.unwrap();
    assert_eq!(status.state, JobState::Succeeded);
    assert_eq!(status.total, 2);
    assert_eq!(status.results.len(), 2);

    let typed: Vec<String> = s
        .actions
        .performed()
        .into_iter()
        .filter_map(|a| a.text)
        .collect();
    assert_eq!(typed, vec!["dev-1", "Logout"]);
}

#[tokio::test]
async fn test_failing_workflow_aborts_the_rest() {
    let s = setup();
    let job_id = s
        .orchestrator
        .create_job(
            "dev-1",
            ids(&["login", "broken", "logout"]),
            JobOptions::default(),
        )
        .await
        .unwrap();

    let status = s.orchestrator.run_job(&job_id).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.results.len(), 2);
    assert_eq!(status.results[1].workflow_id, "broken");
    assert_eq!(status.results[1].status, RunStatus::Error);
    assert_eq!(s.actions.count(), 2);
}

#[tokio::test]
async fn test_missing_workflow_fails_job() {
    let s = setup();
    let job_id = s
        .orchestrator
        .create_job("dev-1", ids(&["ghost"]), JobOptions::default())
        .await
        .unwrap();

    let status = s.orchestrator.run_job(&job_id).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert!(status.results[0].message.as_deref().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_cancelled_pending_job_never_runs() {
    let s = setup();
    let job_id = s
        .orchestrator
        .create_job("dev-1", ids(&["login"]), JobOptions::default())
        .await
        .unwrap();

    let status = s.orchestrator.cancel(&job_id).unwrap();
    assert_eq!(status.state, JobState::Cancelled);

    let err = s.orchestrator.run_job(&job_id).await.unwrap_err();
    assert!(matches!(err, FlowError::ValidationError(_)));
    assert_eq!(s.actions.count(), 0);
}
