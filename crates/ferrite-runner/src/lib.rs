//! Ferrite CI executor runtime.
//!
//! Provisions isolated run environments (a per-step container or a shell
//! on a leased machine directory), executes job steps in order with
//! timeout and quiet-period enforcement, and guarantees teardown.

pub mod container;
pub mod job;
pub mod machine;
pub mod provision;

pub use job::{JobContext, run_job};
pub use provision::{LocalBackend, RetryPolicy, provision_with_retry};

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration shared by every job run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Root under which machine-executor working directories are leased.
    pub data_dir: PathBuf,
    /// Quiet-period limit applied when a step does not set its own.
    pub default_no_output_timeout: Duration,
    /// Wall-clock ceiling for a whole job run.
    pub job_timeout: Duration,
    /// How long an in-flight step may keep running after cancellation
    /// before its environment is torn down under it.
    pub cancel_grace: Duration,
    pub retry: RetryPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::temp_dir().join("ferrite"),
            default_no_output_timeout: Duration::from_secs(600),
            job_timeout: Duration::from_secs(2 * 3600),
            cancel_grace: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// CPU and memory tier for a named resource class.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub cpus: f64,
    pub memory_mb: u64,
}

/// Resolve a resource class name to concrete limits. Unknown classes are
/// rejected at provisioning time, not silently defaulted.
pub fn resource_limits(class: &str) -> Option<ResourceLimits> {
    let limits = match class {
        "small" => ResourceLimits { cpus: 1.0, memory_mb: 2048 },
        "medium" => ResourceLimits { cpus: 2.0, memory_mb: 4096 },
        "large" => ResourceLimits { cpus: 4.0, memory_mb: 8192 },
        "xlarge" => ResourceLimits { cpus: 8.0, memory_mb: 16384 },
        _ => return None,
    };
    Some(limits)
}
