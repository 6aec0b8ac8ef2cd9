//! Execution of a single job run: provision, run steps in order, tear
//! down. Teardown happens on every exit path.

use ferrite_core::definition::{JobDefinition, Step};
use ferrite_core::events::{
    Event, JobRunCompletedPayload, JobRunPayload, StepCompletedPayload, StepOutputPayload,
    StepStartedPayload,
};
use ferrite_core::ids::InvocationId;
use ferrite_core::ports::{Environment, ExecRequest, ExecutorBackend, OutputLine, StatusSink};
use ferrite_core::run::{JobRun, JobRunStatus, RunReason};
use ferrite_core::{Error, Result};
use ferrite_store::{ArtifactStore, WorkspaceStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::provision::provision_with_retry;
use crate::RunnerConfig;

/// Everything a job run needs from the orchestrator.
#[derive(Clone)]
pub struct JobContext {
    pub invocation: InvocationId,
    pub workflow: String,
    pub job: JobDefinition,
    pub backend: Arc<dyn ExecutorBackend>,
    pub workspaces: WorkspaceStore,
    pub artifacts: ArtifactStore,
    pub sink: Arc<dyn StatusSink>,
    pub config: RunnerConfig,
}

/// Run one job to a terminal status. Never returns early without tearing
/// the environment down; infrastructure failures become a failed run with
/// a specific reason rather than an error.
pub async fn run_job(ctx: JobContext, mut cancel: watch::Receiver<bool>) -> JobRun {
    let mut run = JobRun::queued(&ctx.workflow, &ctx.job.name);
    run.status = JobRunStatus::Running;
    run.started_at = Some(chrono::Utc::now());

    publish(
        &ctx,
        Event::JobRunStarted(JobRunPayload {
            invocation_id: ctx.invocation,
            run_id: run.id,
            workflow: ctx.workflow.clone(),
            job: ctx.job.name.clone(),
            at: chrono::Utc::now(),
        }),
    )
    .await;

    let env = match provision_with_retry(ctx.backend.as_ref(), &ctx.job.executor, &ctx.config.retry)
        .await
    {
        Ok(env) => env,
        Err(e) => {
            warn!(job = %ctx.job.name, error = %e, "provisioning failed");
            let run = run.finish(JobRunStatus::Failed, Some(RunReason::Provisioning));
            publish_completed(&ctx, &run).await;
            return run;
        }
    };

    let ceiling = ctx.config.job_timeout;
    let outcome = match timeout(ceiling, execute_steps(&ctx, env.as_ref(), &run, &mut cancel)).await
    {
        Ok(result) => result,
        Err(_) => Err(Error::JobTimeout {
            seconds: ceiling.as_secs(),
        }),
    };

    if let Err(e) = env.destroy().await {
        warn!(job = %ctx.job.name, error = %e, "environment teardown failed");
    }

    let run = match outcome {
        Ok(()) => run.finish(JobRunStatus::Success, None),
        Err(e) => {
            info!(job = %ctx.job.name, error = %e, "job run failed");
            let reason = reason_for(&e);
            run.finish(JobRunStatus::Failed, Some(reason))
        }
    };
    publish_completed(&ctx, &run).await;
    run
}

async fn execute_steps(
    ctx: &JobContext,
    env: &dyn Environment,
    run: &JobRun,
    cancel: &mut watch::Receiver<bool>,
) -> Result<()> {
    for (index, step) in ctx.job.steps.iter().enumerate() {
        if *cancel.borrow() {
            return Err(Error::Cancelled);
        }

        let name = step_name(step);
        let started = std::time::Instant::now();
        publish(
            ctx,
            Event::StepStarted(StepStartedPayload {
                run_id: run.id,
                index,
                name: name.clone(),
                at: chrono::Utc::now(),
            }),
        )
        .await;

        let result = execute_step(ctx, env, run, index, step, cancel).await;

        publish(
            ctx,
            Event::StepCompleted(StepCompletedPayload {
                run_id: run.id,
                index,
                name,
                exit_code: match &result {
                    Ok(code) => *code,
                    Err(Error::StepFailed { exit_code }) => Some(*exit_code),
                    Err(_) => None,
                },
                success: result.is_ok(),
                duration_ms: started.elapsed().as_millis() as u64,
                at: chrono::Utc::now(),
            }),
        )
        .await;

        result?;
    }
    Ok(())
}

/// Execute one step, returning the exit code for run steps. The first
/// error stops the sequence.
async fn execute_step(
    ctx: &JobContext,
    env: &dyn Environment,
    run: &JobRun,
    index: usize,
    step: &Step,
    cancel: &mut watch::Receiver<bool>,
) -> Result<Option<i32>> {
    match step {
        Step::Run(run_step) => {
            let mut step_env: HashMap<String, String> = ctx.job.environment.clone();
            step_env.insert("FERRITE_INVOCATION".to_string(), ctx.invocation.to_string());
            step_env.insert("FERRITE_WORKFLOW".to_string(), ctx.workflow.clone());
            step_env.insert("FERRITE_JOB".to_string(), ctx.job.name.clone());

            let request = ExecRequest {
                command: run_step.command().to_string(),
                env: step_env,
                timeout: run_step.timeout_seconds().map(Duration::from_secs),
                no_output_timeout: run_step
                    .no_output_timeout_seconds()
                    .map(Duration::from_secs)
                    .unwrap_or(ctx.config.default_no_output_timeout),
            };

            let (tx, rx) = mpsc::channel::<OutputLine>(256);
            let pump = spawn_output_pump(ctx.sink.clone(), run.id, index, rx);

            let outcome = exec_with_cancel(env, &request, tx, cancel, ctx.config.cancel_grace).await;
            let _ = pump.await;
            let outcome = outcome?;

            match outcome {
                ferrite_core::ports::ExecOutcome::Exited { exit_code: 0, .. } => Ok(Some(0)),
                ferrite_core::ports::ExecOutcome::Exited { exit_code, .. } => {
                    if run_step.continue_on_error() {
                        warn!(exit_code, "step failed but continue_on_error is set");
                        Ok(Some(exit_code))
                    } else {
                        Err(Error::StepFailed { exit_code })
                    }
                }
                ferrite_core::ports::ExecOutcome::TimedOut { seconds } => {
                    Err(Error::StepTimeout { seconds })
                }
                ferrite_core::ports::ExecOutcome::Stalled { seconds } => {
                    Err(Error::StepStalled { seconds })
                }
            }
        }
        Step::AttachWorkspace(attach) => {
            let dest = match &attach.at {
                Some(at) => env.workdir().join(at),
                None => env.workdir().to_path_buf(),
            };
            ctx.workspaces
                .attach(ctx.invocation, &ctx.workflow, &dest)
                .await?;
            Ok(None)
        }
        Step::PersistWorkspace(persist) => {
            let paths: Vec<std::path::PathBuf> =
                persist.paths.iter().map(std::path::PathBuf::from).collect();
            ctx.workspaces
                .persist(ctx.invocation, &ctx.workflow, env.workdir(), &paths)
                .await?;
            Ok(None)
        }
        Step::StoreArtifact(store) => {
            let destination = store
                .destination
                .clone()
                .unwrap_or_else(|| final_component(&store.path));
            ctx.artifacts
                .store(
                    ctx.invocation,
                    &ctx.job.name,
                    env.workdir(),
                    &store.path,
                    &destination,
                )
                .await?;
            Ok(None)
        }
        Step::Invoke(invoke) => Err(Error::Internal(format!(
            "unexpanded command invocation {:?} reached the runtime",
            invoke.command
        ))),
    }
}

/// Run the exec, honoring cancellation: a cancelled step gets a grace
/// period to finish before it is abandoned (teardown then kills it).
async fn exec_with_cancel(
    env: &dyn Environment,
    request: &ExecRequest,
    tx: mpsc::Sender<OutputLine>,
    cancel: &mut watch::Receiver<bool>,
    grace: Duration,
) -> Result<ferrite_core::ports::ExecOutcome> {
    let fut = env.exec(request, tx);
    tokio::pin!(fut);
    tokio::select! {
        result = &mut fut => result,
        _ = cancelled(cancel) => match timeout(grace, &mut fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        },
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn spawn_output_pump(
    sink: Arc<dyn StatusSink>,
    run_id: ferrite_core::ids::JobRunId,
    index: usize,
    mut rx: mpsc::Receiver<OutputLine>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let event = Event::StepOutput(StepOutputPayload {
                run_id,
                index,
                stream: line.stream,
                line_number: line.line_number,
                content: line.content,
                at: line.timestamp,
            });
            if sink.publish(event).await.is_err() {
                break;
            }
        }
    })
}

fn step_name(step: &Step) -> String {
    match step {
        Step::Run(run) => run.display_name().to_string(),
        Step::Invoke(invoke) => invoke.command.clone(),
        Step::AttachWorkspace(_) => "attach_workspace".to_string(),
        Step::PersistWorkspace(_) => "persist_workspace".to_string(),
        Step::StoreArtifact(_) => "store_artifact".to_string(),
    }
}

fn final_component(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

fn reason_for(error: &Error) -> RunReason {
    match error {
        Error::StepFailed { .. } => RunReason::StepFailed,
        Error::StepTimeout { .. } => RunReason::StepTimeout,
        Error::StepStalled { .. } => RunReason::Stalled,
        Error::JobTimeout { .. } => RunReason::JobTimeout,
        Error::Provisioning(_) => RunReason::Provisioning,
        Error::Workspace(_) => RunReason::Workspace,
        Error::Artifact(_) => RunReason::Artifact,
        Error::Cancelled => RunReason::Cancelled,
        _ => RunReason::StepFailed,
    }
}

async fn publish(ctx: &JobContext, event: Event) {
    if let Err(e) = ctx.sink.publish(event).await {
        warn!(error = %e, "failed to publish event");
    }
}

async fn publish_completed(ctx: &JobContext, run: &JobRun) {
    publish(
        ctx,
        Event::JobRunCompleted(JobRunCompletedPayload {
            invocation_id: ctx.invocation,
            run_id: run.id,
            workflow: run.workflow.clone(),
            job: run.job.clone(),
            status: run.status,
            reason: run.reason,
            duration_ms: run.duration_ms,
            at: chrono::Utc::now(),
        }),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::LocalBackend;
    use ferrite_core::definition::{
        AttachWorkspaceStep, ExecutorSpec, PersistWorkspaceStep, RunStep, RunStepDetail,
        StoreArtifactStep,
    };
    use ferrite_core::ports::MemorySink;
    use ferrite_store::FilesystemStore;

    fn machine_job(name: &str, steps: Vec<Step>) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            executor: ExecutorSpec {
                image: None,
                machine: Some("linux".to_string()),
                resource_class: "small".to_string(),
            },
            environment: HashMap::new(),
            steps,
        }
    }

    fn run_step(command: &str) -> Step {
        Step::Run(RunStep::Command(command.to_string()))
    }

    struct Fixture {
        ctx: JobContext,
        sink: Arc<MemorySink>,
        _data: tempfile::TempDir,
        _blobs: tempfile::TempDir,
    }

    fn fixture(job: JobDefinition) -> Fixture {
        let data = tempfile::tempdir().unwrap();
        let blobs = tempfile::tempdir().unwrap();
        let store: Arc<dyn ferrite_core::ports::BlobStore> =
            Arc::new(FilesystemStore::new(blobs.path()));
        let sink = Arc::new(MemorySink::new());
        let config = RunnerConfig {
            data_dir: data.path().to_path_buf(),
            ..RunnerConfig::default()
        };
        let ctx = JobContext {
            invocation: InvocationId::new(),
            workflow: "main".to_string(),
            job,
            backend: Arc::new(LocalBackend::new(config.clone())),
            workspaces: WorkspaceStore::new(store.clone()),
            artifacts: ArtifactStore::new(store),
            sink: sink.clone(),
            config,
        };
        Fixture { ctx, sink, _data: data, _blobs: blobs }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn test_successful_run_emits_step_events() {
        let f = fixture(machine_job(
            "build",
            vec![run_step("echo compiling"), run_step("echo done")],
        ));

        let run = run_job(f.ctx.clone(), no_cancel()).await;
        assert_eq!(run.status, JobRunStatus::Success);
        assert_eq!(run.reason, None);

        let events = f.sink.events();
        let outputs: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                Event::StepOutput(p) => Some(p.content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(outputs, vec!["compiling", "done"]);
        let completed = events
            .iter()
            .filter(|e| matches!(e, Event::StepCompleted(_)))
            .count();
        assert_eq!(completed, 2);
    }

    #[tokio::test]
    async fn test_first_failure_stops_the_sequence() {
        let f = fixture(machine_job(
            "build",
            vec![run_step("exit 7"), run_step("echo never")],
        ));

        let run = run_job(f.ctx.clone(), no_cancel()).await;
        assert_eq!(run.status, JobRunStatus::Failed);
        assert_eq!(run.reason, Some(RunReason::StepFailed));

        let started = f
            .sink
            .events()
            .iter()
            .filter(|e| matches!(e, Event::StepStarted(_)))
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_continue_on_error_keeps_going() {
        let f = fixture(machine_job(
            "lint",
            vec![
                Step::Run(RunStep::Detailed(RunStepDetail {
                    name: Some("advisory lint".to_string()),
                    command: "exit 1".to_string(),
                    timeout_seconds: None,
                    no_output_timeout_seconds: None,
                    continue_on_error: true,
                })),
                run_step("echo still here"),
            ],
        ));

        let run = run_job(f.ctx.clone(), no_cancel()).await;
        assert_eq!(run.status, JobRunStatus::Success);
    }

    #[tokio::test]
    async fn test_attach_without_snapshot_fails_with_workspace_reason() {
        let f = fixture(machine_job(
            "deploy",
            vec![Step::AttachWorkspace(AttachWorkspaceStep::default())],
        ));

        let run = run_job(f.ctx.clone(), no_cancel()).await;
        assert_eq!(run.status, JobRunStatus::Failed);
        assert_eq!(run.reason, Some(RunReason::Workspace));
    }

    #[tokio::test]
    async fn test_persist_then_attach_across_runs() {
        let producer = machine_job(
            "build",
            vec![
                run_step("mkdir -p dist && echo bundle > dist/app"),
                Step::PersistWorkspace(PersistWorkspaceStep {
                    paths: vec!["dist".to_string()],
                }),
            ],
        );
        let f = fixture(producer);
        let run = run_job(f.ctx.clone(), no_cancel()).await;
        assert_eq!(run.status, JobRunStatus::Success);

        let mut consumer_ctx = f.ctx.clone();
        consumer_ctx.job = machine_job(
            "test",
            vec![
                Step::AttachWorkspace(AttachWorkspaceStep::default()),
                run_step("grep bundle dist/app"),
            ],
        );
        let run = run_job(consumer_ctx, no_cancel()).await;
        assert_eq!(run.status, JobRunStatus::Success);
    }

    #[tokio::test]
    async fn test_store_artifact_defaults_destination() {
        let f = fixture(machine_job(
            "test",
            vec![
                run_step("echo '<ok/>' > junit.xml"),
                Step::StoreArtifact(StoreArtifactStep {
                    path: "junit.xml".to_string(),
                    destination: None,
                }),
            ],
        ));

        let run = run_job(f.ctx.clone(), no_cancel()).await;
        assert_eq!(run.status, JobRunStatus::Success);

        let bytes = f
            .ctx
            .artifacts
            .retrieve(f.ctx.invocation, "test", "junit.xml")
            .await
            .unwrap();
        assert!(bytes.is_some());
    }

    #[tokio::test]
    async fn test_workdir_is_torn_down_even_on_failure() {
        let f = fixture(machine_job("build", vec![run_step("exit 1")]));
        let data_dir = f.ctx.config.data_dir.clone();

        let run = run_job(f.ctx.clone(), no_cancel()).await;
        assert_eq!(run.status, JobRunStatus::Failed);

        let leases: Vec<_> = std::fs::read_dir(&data_dir).unwrap().collect();
        assert!(leases.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_steps() {
        let f = fixture(machine_job("build", vec![run_step("echo hello")]));
        let (tx, rx) = watch::channel(true);

        let run = run_job(f.ctx.clone(), rx).await;
        drop(tx);
        assert_eq!(run.status, JobRunStatus::Failed);
        assert_eq!(run.reason, Some(RunReason::Cancelled));
    }
}
