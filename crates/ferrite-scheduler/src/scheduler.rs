//! Invocation orchestration: parameter resolution, workflow selection,
//! and DAG-ordered job dispatch under a concurrency cap.

use ferrite_core::definition::{PipelineDefinition, WorkflowDefinition};
use ferrite_core::events::{
    Event, InvocationCompletedPayload, InvocationStartedPayload, JobRunSkippedPayload,
    WorkflowSelectedPayload,
};
use ferrite_core::ids::InvocationId;
use ferrite_core::ports::{ExecutorBackend, StatusSink};
use ferrite_core::run::{
    InvocationReport, JobRun, JobRunStatus, RunReason, WorkflowReport, WorkflowStatus,
};
use ferrite_core::trigger::{TriggerContext, resolve_parameters};
use ferrite_core::{Error, Result, validate};
use ferrite_runner::{JobContext, RunnerConfig, run_job};
use ferrite_store::{ArtifactStore, WorkspaceStore};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::dag::WorkflowDag;
use crate::filters;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cap on concurrently executing job runs across the invocation.
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

pub struct Scheduler {
    backend: Arc<dyn ExecutorBackend>,
    workspaces: WorkspaceStore,
    artifacts: ArtifactStore,
    sink: Arc<dyn StatusSink>,
    runner: RunnerConfig,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        backend: Arc<dyn ExecutorBackend>,
        workspaces: WorkspaceStore,
        artifacts: ArtifactStore,
        sink: Arc<dyn StatusSink>,
        runner: RunnerConfig,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            backend,
            workspaces,
            artifacts,
            sink,
            runner,
            config,
        }
    }

    /// Run one pipeline invocation to completion.
    pub async fn run_invocation(
        &self,
        definition: &PipelineDefinition,
        trigger: &TriggerContext,
    ) -> Result<InvocationReport> {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.run_invocation_with_cancel(definition, trigger, cancel_rx)
            .await
    }

    /// Run one pipeline invocation, observing the cancellation signal:
    /// once it flips, unstarted runs are skipped and in-flight steps get
    /// a grace period before teardown.
    pub async fn run_invocation_with_cancel(
        &self,
        definition: &PipelineDefinition,
        trigger: &TriggerContext,
        cancel: watch::Receiver<bool>,
    ) -> Result<InvocationReport> {
        self.run_invocation_as(InvocationId::new(), definition, trigger, cancel)
            .await
    }

    /// Run one pipeline invocation under a caller-minted id. Minting the
    /// id before driving the future gives callers a handle on the
    /// invocation while it is still running.
    pub async fn run_invocation_as(
        &self,
        invocation: InvocationId,
        definition: &PipelineDefinition,
        trigger: &TriggerContext,
        cancel: watch::Receiver<bool>,
    ) -> Result<InvocationReport> {
        let definition = validate::validate(definition)?;
        let parameters = resolve_parameters(&definition.parameters, trigger)?;

        let started_at = chrono::Utc::now();
        let clock = std::time::Instant::now();
        info!(%invocation, branch = %trigger.branch, commit = %trigger.commit, "invocation started");

        self.publish(Event::InvocationStarted(InvocationStartedPayload {
            invocation_id: invocation,
            branch: trigger.branch.clone(),
            commit: trigger.commit.clone(),
            at: started_at,
        }))
        .await;

        let eligible = filters::eligible_workflows(&definition, &parameters);
        for workflow in &eligible {
            self.publish(Event::WorkflowSelected(WorkflowSelectedPayload {
                invocation_id: invocation,
                workflow: workflow.name.clone(),
                at: chrono::Utc::now(),
            }))
            .await;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let workflow_futures = eligible.iter().map(|workflow| {
            self.run_workflow(
                &definition,
                workflow,
                invocation,
                trigger,
                &parameters,
                semaphore.clone(),
                cancel.clone(),
            )
        });
        let workflows = futures::future::join_all(workflow_futures)
            .await
            .into_iter()
            .collect::<Result<Vec<WorkflowReport>>>()?;

        let status = if workflows.iter().all(|w| w.status == WorkflowStatus::Success) {
            WorkflowStatus::Success
        } else {
            WorkflowStatus::Failed
        };
        let completed_at = chrono::Utc::now();
        let duration_ms = clock.elapsed().as_millis() as u64;
        info!(%invocation, ?status, duration_ms, "invocation completed");

        self.publish(Event::InvocationCompleted(InvocationCompletedPayload {
            invocation_id: invocation,
            status,
            duration_ms,
            at: completed_at,
        }))
        .await;

        Ok(InvocationReport {
            id: invocation,
            branch: trigger.branch.clone(),
            commit: trigger.commit.clone(),
            status,
            workflows,
            started_at,
            completed_at,
            duration_ms,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_workflow(
        &self,
        definition: &PipelineDefinition,
        workflow: &WorkflowDefinition,
        invocation: InvocationId,
        trigger: &TriggerContext,
        parameters: &BTreeMap<String, ferrite_core::definition::ParameterValue>,
        semaphore: Arc<Semaphore>,
        cancel: watch::Receiver<bool>,
    ) -> Result<WorkflowReport> {
        let dag = WorkflowDag::build(workflow)?;
        let producer: Option<String> = workflow
            .jobs
            .iter()
            .find(|r| {
                definition
                    .job(&r.job)
                    .is_some_and(|j| j.persists_workspace())
            })
            .map(|r| r.job.clone());

        let mut statuses: HashMap<String, JobRunStatus> = HashMap::new();
        let mut runs: HashMap<String, JobRun> = HashMap::new();
        let mut dispatched: HashSet<String> = HashSet::new();
        let mut in_flight: JoinSet<JobRun> = JoinSet::new();

        // Filter skips are decided up front; they never block dependents.
        for job_ref in &workflow.jobs {
            if let Some(reason) = filters::skip_reason(job_ref, &trigger.branch, parameters) {
                self.record_skip(
                    invocation,
                    &workflow.name,
                    &job_ref.job,
                    reason,
                    &mut statuses,
                    &mut runs,
                    &mut dispatched,
                )
                .await;
            }
        }

        loop {
            // Dispatch everything dispatchable, in declaration order.
            // Skips recorded during a pass can unblock later references,
            // so keep sweeping until a pass makes no progress.
            let mut progressed = true;
            while progressed {
                progressed = false;
                for job_ref in &workflow.jobs {
                    if dispatched.contains(&job_ref.job) {
                        continue;
                    }
                    if *cancel.borrow() {
                        self.record_skip(
                            invocation,
                            &workflow.name,
                            &job_ref.job,
                            RunReason::Cancelled,
                            &mut statuses,
                            &mut runs,
                            &mut dispatched,
                        )
                        .await;
                        progressed = true;
                        continue;
                    }
                    if !dag.is_ready(&job_ref.job, &statuses) {
                        continue;
                    }
                    let job = definition.job(&job_ref.job).ok_or_else(|| {
                        Error::Internal(format!("unresolved job reference {:?}", job_ref.job))
                    })?;

                    // A run that restores the workspace needs the producer
                    // run to have succeeded; anything else leaves it with
                    // nothing to attach.
                    if job.attaches_workspace()
                        && let Some(producer_name) = &producer
                    {
                        match statuses.get(producer_name) {
                            Some(JobRunStatus::Success) => {}
                            Some(_) => {
                                self.record_skip(
                                    invocation,
                                    &workflow.name,
                                    &job_ref.job,
                                    RunReason::UnmetDependency,
                                    &mut statuses,
                                    &mut runs,
                                    &mut dispatched,
                                )
                                .await;
                                progressed = true;
                                continue;
                            }
                            None => continue,
                        }
                    }

                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::Internal(format!("semaphore closed: {}", e)))?;
                    let ctx = JobContext {
                        invocation,
                        workflow: workflow.name.clone(),
                        job: job.clone(),
                        backend: self.backend.clone(),
                        workspaces: self.workspaces.clone(),
                        artifacts: self.artifacts.clone(),
                        sink: self.sink.clone(),
                        config: self.runner.clone(),
                    };
                    let run_cancel = cancel.clone();
                    dispatched.insert(job_ref.job.clone());
                    progressed = true;
                    in_flight.spawn(async move {
                        let _permit = permit;
                        run_job(ctx, run_cancel).await
                    });
                }
            }

            if in_flight.is_empty() {
                break;
            }
            match in_flight.join_next().await {
                Some(Ok(run)) => {
                    statuses.insert(run.job.clone(), run.status);
                    runs.insert(run.job.clone(), run);
                }
                Some(Err(e)) => {
                    warn!(workflow = %workflow.name, error = %e, "job task failed");
                    return Err(Error::Internal(format!("job task panicked: {}", e)));
                }
                None => break,
            }
        }

        // Report in declaration order.
        let ordered: Vec<JobRun> = workflow
            .jobs
            .iter()
            .filter_map(|r| runs.remove(&r.job))
            .collect();
        let status = if ordered.iter().any(|r| r.status == JobRunStatus::Failed) {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Success
        };
        Ok(WorkflowReport {
            workflow: workflow.name.clone(),
            status,
            runs: ordered,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_skip(
        &self,
        invocation: InvocationId,
        workflow: &str,
        job: &str,
        reason: RunReason,
        statuses: &mut HashMap<String, JobRunStatus>,
        runs: &mut HashMap<String, JobRun>,
        dispatched: &mut HashSet<String>,
    ) {
        info!(workflow, job, %reason, "job run skipped");
        let run = JobRun::queued(workflow, job).skipped(reason);
        self.publish(Event::JobRunSkipped(JobRunSkippedPayload {
            invocation_id: invocation,
            run_id: run.id,
            workflow: workflow.to_string(),
            job: job.to_string(),
            reason,
            at: chrono::Utc::now(),
        }))
        .await;
        statuses.insert(job.to_string(), run.status);
        runs.insert(job.to_string(), run);
        dispatched.insert(job.to_string());
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.sink.publish(event).await {
            warn!(error = %e, "failed to publish event");
        }
    }
}
