//! Job run and invocation report types.

use crate::ids::{InvocationId, JobRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One execution instance of a job within a pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: JobRunId,
    pub job: String,
    pub workflow: String,
    pub status: JobRunStatus,
    /// Why the run failed or was skipped; `None` for successful runs.
    pub reason: Option<RunReason>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl JobRun {
    pub fn queued(workflow: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            id: JobRunId::new(),
            job: job.into(),
            workflow: workflow.into(),
            status: JobRunStatus::Pending,
            reason: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Mark this run terminal with the given status and reason.
    pub fn finish(mut self, status: JobRunStatus, reason: Option<RunReason>) -> Self {
        self.status = status;
        self.reason = reason;
        self.completed_at = Some(Utc::now());
        if let Some(started) = self.started_at {
            self.duration_ms = Some((Utc::now() - started).num_milliseconds().max(0) as u64);
        }
        self
    }

    pub fn skipped(self, reason: RunReason) -> Self {
        self.finish(JobRunStatus::Skipped, Some(reason))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl JobRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobRunStatus::Success | JobRunStatus::Failed | JobRunStatus::Skipped
        )
    }
}

/// The distinct reasons a run can end failed or skipped; surfaced verbatim
/// in the invocation report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    StepFailed,
    StepTimeout,
    Stalled,
    JobTimeout,
    Provisioning,
    Workspace,
    Artifact,
    UnmetDependency,
    BranchFiltered,
    ParameterFiltered,
    Cancelled,
}

impl std::fmt::Display for RunReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RunReason::StepFailed => "step failed",
            RunReason::StepTimeout => "step timeout",
            RunReason::Stalled => "no output within quiet period",
            RunReason::JobTimeout => "job wall-clock ceiling exceeded",
            RunReason::Provisioning => "environment provisioning failed",
            RunReason::Workspace => "workspace error",
            RunReason::Artifact => "artifact error",
            RunReason::UnmetDependency => "unmet dependency",
            RunReason::BranchFiltered => "branch filter did not match",
            RunReason::ParameterFiltered => "parameter guard evaluated false",
            RunReason::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Success,
    Failed,
}

/// Terminal statuses for every job reference in one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub workflow: String,
    pub status: WorkflowStatus,
    pub runs: Vec<JobRun>,
}

impl WorkflowReport {
    pub fn run(&self, job: &str) -> Option<&JobRun> {
        self.runs.iter().find(|r| r.job == job)
    }
}

/// The final report for one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationReport {
    pub id: InvocationId,
    pub branch: String,
    pub commit: String,
    pub status: WorkflowStatus,
    pub workflows: Vec<WorkflowReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl InvocationReport {
    pub fn workflow(&self, name: &str) -> Option<&WorkflowReport> {
        self.workflows.iter().find(|w| w.workflow == name)
    }
}
