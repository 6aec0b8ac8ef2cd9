//! Lifecycle events emitted to the status/log sink.
//!
//! The core emits a stream of status transitions and captured step output
//! per job run; delivery and formatting are the sink's concern.

use crate::ids::{InvocationId, JobRunId};
use crate::run::{JobRunStatus, RunReason, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    InvocationStarted(InvocationStartedPayload),
    InvocationCompleted(InvocationCompletedPayload),

    WorkflowSelected(WorkflowSelectedPayload),

    JobRunStarted(JobRunPayload),
    JobRunCompleted(JobRunCompletedPayload),
    JobRunSkipped(JobRunSkippedPayload),

    StepStarted(StepStartedPayload),
    StepOutput(StepOutputPayload),
    StepCompleted(StepCompletedPayload),
}

impl Event {
    /// Routing subject for this event.
    pub fn subject(&self) -> String {
        match self {
            Event::InvocationStarted(p) => format!("invocation.started.{}", p.invocation_id),
            Event::InvocationCompleted(p) => format!("invocation.completed.{}", p.invocation_id),
            Event::WorkflowSelected(p) => {
                format!("invocation.{}.workflow.{}", p.invocation_id, p.workflow)
            }
            Event::JobRunStarted(p) => format!("run.{}.started", p.run_id),
            Event::JobRunCompleted(p) => format!("run.{}.completed", p.run_id),
            Event::JobRunSkipped(p) => format!("run.{}.skipped", p.run_id),
            Event::StepStarted(p) => format!("run.{}.step.{}.started", p.run_id, p.index),
            Event::StepOutput(p) => format!("run.{}.step.{}.output", p.run_id, p.index),
            Event::StepCompleted(p) => format!("run.{}.step.{}.completed", p.run_id, p.index),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationStartedPayload {
    pub invocation_id: InvocationId,
    pub branch: String,
    pub commit: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationCompletedPayload {
    pub invocation_id: InvocationId,
    pub status: WorkflowStatus,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSelectedPayload {
    pub invocation_id: InvocationId,
    pub workflow: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunPayload {
    pub invocation_id: InvocationId,
    pub run_id: JobRunId,
    pub workflow: String,
    pub job: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunCompletedPayload {
    pub invocation_id: InvocationId,
    pub run_id: JobRunId,
    pub workflow: String,
    pub job: String,
    pub status: JobRunStatus,
    pub reason: Option<RunReason>,
    pub duration_ms: Option<u64>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunSkippedPayload {
    pub invocation_id: InvocationId,
    pub run_id: JobRunId,
    pub workflow: String,
    pub job: String,
    pub reason: RunReason,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStartedPayload {
    pub run_id: JobRunId,
    pub index: usize,
    pub name: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutputPayload {
    pub run_id: JobRunId,
    pub index: usize,
    pub stream: OutputStream,
    pub line_number: u32,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedPayload {
    pub run_id: JobRunId,
    pub index: usize,
    pub name: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_shape() {
        let run_id = JobRunId::new();
        let event = Event::StepOutput(StepOutputPayload {
            run_id,
            index: 2,
            stream: OutputStream::Stdout,
            line_number: 1,
            content: "hello".into(),
            at: Utc::now(),
        });
        assert_eq!(event.subject(), format!("run.{}.step.2.output", run_id));
    }
}
