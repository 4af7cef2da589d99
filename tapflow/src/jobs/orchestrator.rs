//! Job orchestration

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::executor::{Executor, RunContext};
use crate::engine::outcome::RunStatus;
use crate::errors::FlowError;
use crate::graph::WorkflowGraph;
use crate::http::devices::DeviceRegistry;
use crate::http::jobs::JobApi;
use crate::http::workflows::WorkflowStore;
use crate::models::job::{
    CreateJobRequest, ExecutionMode, Job, JobId, JobOptions, JobState, JobStatus,
    WorkflowRunSummary,
};

struct JobEntry {
    job: Job,
    state: JobState,
    results: Vec<WorkflowRunSummary>,
    cancel: CancellationToken,
}

impl JobEntry {
    fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.job.id.clone(),
            state: self.state,
            total: self.job.workflow_ids.len(),
            results: self.results.clone(),
        }
    }
}

/// Creates jobs and runs their workflows one after another on the job's device
pub struct JobOrchestrator {
    api: Arc<dyn JobApi>,
    devices: Arc<dyn DeviceRegistry>,
    workflows: Arc<dyn WorkflowStore>,
    executor: Arc<Executor>,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl JobOrchestrator {
    pub fn new(
        api: Arc<dyn JobApi>,
        devices: Arc<dyn DeviceRegistry>,
        workflows: Arc<dyn WorkflowStore>,
        executor: Arc<Executor>,
    ) -> Self {
        Self {
            api,
            devices,
            workflows,
            executor,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and dispatch a job; its workflows run on [`JobOrchestrator::run_job`]
    pub async fn create_job(
        &self,
        device_id: &str,
        workflow_ids: Vec<String>,
        options: JobOptions,
    ) -> Result<JobId, FlowError> {
        if workflow_ids.is_empty() {
            return Err(FlowError::ValidationError(
                "a job needs at least one workflow".to_string(),
            ));
        }
        if options.execution_mode != ExecutionMode::Sequential {
            return Err(FlowError::ValidationError(format!(
                "execution mode {} is not supported",
                options.execution_mode
            )));
        }
        if !self.devices.device_exists(device_id).await? {
            return Err(FlowError::NotFound(format!("device {}", device_id)));
        }

        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("{} on {}", workflow_ids.join(", "), device_id));
        let request = CreateJobRequest {
            name: name.clone(),
            device_id: device_id.to_string(),
            flow_ids: workflow_ids.clone(),
            data_collection_id: options.data_collection_id.clone(),
            priority: options.priority,
            execution_mode: options.execution_mode,
        };
        let job_id = self.api.create_job(&request).await?;

        let job = Job {
            id: job_id.clone(),
            name,
            device_id: device_id.to_string(),
            workflow_ids,
            data_collection_id: options.data_collection_id,
            priority: options.priority,
            execution_mode: options.execution_mode,
            created_at: Utc::now(),
        };
        info!(
            "Created job {} with {} workflow(s) on device {}",
            job_id,
            job.workflow_ids.len(),
            device_id
        );

        self.lock()?.insert(
            job_id.clone(),
            JobEntry {
                job,
                state: JobState::Pending,
                results: Vec::new(),
                cancel: CancellationToken::new(),
            },
        );
        Ok(job_id)
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.lock().ok()?.get(job_id).map(|e| e.job.clone())
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.lock().ok()?.get(job_id).map(JobEntry::status)
    }

    /// Stop the job's current run; a job that has not started never will
    pub fn cancel(&self, job_id: &str) -> Result<JobStatus, FlowError> {
        let mut jobs = self.lock()?;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| FlowError::NotFound(format!("job {}", job_id)))?;

        if !entry.state.is_finished() {
            info!("Cancelling job {}", job_id);
            entry.cancel.cancel();
            if entry.state == JobState::Pending {
                entry.state = JobState::Cancelled;
            }
        }
        Ok(entry.status())
    }

    /// Run the job in the background
    pub fn start(self: &Arc<Self>, job_id: &str) -> Result<JobStatus, FlowError> {
        let status = self.begin(job_id)?;
        let orchestrator = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.execute(&job_id).await {
                error!("Job {} failed: {}", job_id, e);
            }
        });
        Ok(status)
    }

    /// Run the job's workflows in order, stopping at the first one that does not succeed
    pub async fn run_job(&self, job_id: &str) -> Result<JobStatus, FlowError> {
        self.begin(job_id)?;
        self.execute(job_id).await
    }

    fn begin(&self, job_id: &str) -> Result<JobStatus, FlowError> {
        let mut jobs = self.lock()?;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| FlowError::NotFound(format!("job {}", job_id)))?;
        if entry.state != JobState::Pending {
            return Err(FlowError::ValidationError(format!(
                "job {} is already {:?}",
                job_id, entry.state
            )));
        }
        entry.state = JobState::Running;
        Ok(entry.status())
    }

    async fn execute(&self, job_id: &str) -> Result<JobStatus, FlowError> {
        let (job, cancel) = {
            let jobs = self.lock()?;
            let entry = jobs
                .get(job_id)
                .ok_or_else(|| FlowError::NotFound(format!("job {}", job_id)))?;
            (entry.job.clone(), entry.cancel.clone())
        };

        for workflow_id in &job.workflow_ids {
            if cancel.is_cancelled() {
                break;
            }

            let summary = self.run_workflow(&job, workflow_id, &cancel).await;
            let succeeded = summary.status == RunStatus::Success;
            if !succeeded {
                warn!(
                    "Workflow {} of job {} ended with {:?}, skipping the rest",
                    workflow_id, job.id, summary.status
                );
            }

            self.lock()?
                .get_mut(job_id)
                .ok_or_else(|| FlowError::NotFound(format!("job {}", job_id)))?
                .results
                .push(summary);

            if !succeeded {
                break;
            }
        }

        let mut jobs = self.lock()?;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| FlowError::NotFound(format!("job {}", job_id)))?;
        entry.state = reduce(&entry.results, entry.job.workflow_ids.len(), cancel.is_cancelled());
        info!("Job {} finished as {:?}", job_id, entry.state);
        Ok(entry.status())
    }

    async fn run_workflow(
        &self,
        job: &Job,
        workflow_id: &str,
        cancel: &CancellationToken,
    ) -> WorkflowRunSummary {
        let failed = |err: FlowError| WorkflowRunSummary {
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Error,
            failed_node: None,
            error_kind: Some(err.kind()),
            message: Some(err.to_string()),
        };

        let workflow = match self.workflows.get_workflow(workflow_id).await {
            Ok(workflow) => workflow,
            Err(e) => return failed(e),
        };
        let graph = match WorkflowGraph::new(workflow) {
            Ok(graph) => graph,
            Err(e) => return failed(e.into()),
        };

        let mut variables: HashMap<String, Value> = HashMap::new();
        variables.insert("jobId".to_string(), json!(job.id));
        variables.insert("deviceId".to_string(), json!(job.device_id));
        if let Some(collection_id) = &job.data_collection_id {
            variables.insert("dataCollectionId".to_string(), json!(collection_id));
        }

        let context = RunContext::new(job.device_id.clone())
            .with_variables(variables)
            .with_cancel(cancel.child_token());
        self.executor.run(&graph, context).await.summary()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<JobId, JobEntry>>, FlowError> {
        self.jobs
            .lock()
            .map_err(|e| FlowError::Internal(format!("job table poisoned: {}", e)))
    }
}

/// Aggregate state of a job from the results of its runs so far
pub fn reduce(results: &[WorkflowRunSummary], total: usize, cancelled: bool) -> JobState {
    match results.last().map(|r| r.status) {
        Some(RunStatus::Cancelled) => JobState::Cancelled,
        Some(RunStatus::Error) => JobState::Failed,
        _ if cancelled => JobState::Cancelled,
        Some(RunStatus::Success) if results.len() == total => JobState::Succeeded,
        None if total == 0 => JobState::Succeeded,
        _ => JobState::Running,
    }
}
