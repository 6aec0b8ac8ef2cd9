//! Port traits (hexagonal architecture).
//!
//! These traits define the narrow interfaces between the orchestration
//! core and its external collaborators: the executor backend that
//! provisions run environments, the blob store backing workspaces and
//! artifacts, and the status/log sink.

use crate::Result;
use crate::definition::ExecutorSpec;
use crate::events::{Event, OutputStream};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// One captured line of step output.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: DateTime<Utc>,
}

/// A command execution request against a run environment.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: String,
    pub env: HashMap<String, String>,
    /// Hard wall-clock limit for this execution.
    pub timeout: Option<Duration>,
    /// Kill the execution if it produces no output for this long.
    pub no_output_timeout: Duration,
}

/// How an execution ended. Timeouts and stalls are outcomes, not errors:
/// they fail the step with a distinct reason but the environment remains
/// usable for teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Exited { exit_code: i32, duration_ms: u64 },
    TimedOut { seconds: u64 },
    Stalled { seconds: u64 },
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExecOutcome::Exited { exit_code: 0, .. })
    }
}

/// An isolated run environment leased for a single job run.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Execute a command line, streaming captured output to the channel.
    async fn exec(
        &self,
        request: &ExecRequest,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<ExecOutcome>;

    /// Host directory where the job's files live; workspace snapshots are
    /// restored into and captured from here.
    fn workdir(&self) -> &Path;

    /// Tear the environment down, releasing any leased resources and
    /// killing any sub-processes still running. Always called, regardless
    /// of the job run's outcome.
    async fn destroy(&self) -> Result<()>;
}

/// Provisioner of run environments. The orchestrator never manages the
/// provisioning substrate itself.
#[async_trait]
pub trait ExecutorBackend: Send + Sync {
    /// Acquire an isolated environment per the executor specification
    /// (image or machine plus a named resource class).
    async fn create(&self, spec: &ExecutorSpec) -> Result<Box<dyn Environment>>;
}

/// Durable blob storage for workspace snapshots and artifacts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys starting with the given prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// External observability sink for status transitions and step output.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
}

/// In-memory sink that records every event; used by tests and by callers
/// that want to inspect the stream after the fact.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("sink poisoned").clone()
    }
}

#[async_trait]
impl StatusSink for MemorySink {
    async fn publish(&self, event: Event) -> Result<()> {
        self.events.lock().expect("sink poisoned").push(event);
        Ok(())
    }
}
