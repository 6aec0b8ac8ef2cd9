//! Ferrite CI scheduler: turns a validated pipeline definition plus a
//! trigger into job runs, dispatching each workflow's DAG in declaration
//! order under a global concurrency cap.

pub mod dag;
pub mod filters;
pub mod scheduler;

pub use dag::WorkflowDag;
pub use scheduler::{Scheduler, SchedulerConfig};
