//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline YAML document:
//! parameters, reusable commands, jobs, and workflows. Parsing is strict;
//! unknown keys are definition errors, never silently ignored.

use crate::Result;
use crate::predicate::Predicate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The top-level pipeline document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    pub version: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    #[serde(default)]
    pub commands: Vec<CommandDefinition>,
    pub jobs: Vec<JobDefinition>,
    pub workflows: Vec<WorkflowDefinition>,
}

impl PipelineDefinition {
    /// Parse a pipeline document from YAML. Structural invariants are
    /// checked separately by [`crate::validate::validate`].
    pub fn from_yaml(input: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Look up a command by name.
    pub fn command(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|c| c.name == name)
    }
}

/// A declared pipeline parameter, supplied (or defaulted) at trigger time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub parameter_type: ParameterType,
    pub default: ParameterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Boolean,
    String,
}

/// A resolved parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Boolean(bool),
    String(String),
}

impl ParameterValue {
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            ParameterValue::Boolean(_) => ParameterType::Boolean,
            ParameterValue::String(_) => ParameterType::String,
        }
    }

    /// Truthiness used by bare `parameter` predicates: a boolean is its own
    /// value, a string is true when non-empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            ParameterValue::Boolean(b) => *b,
            ParameterValue::String(s) => !s.is_empty(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterValue::Boolean(b) => write!(f, "{}", b),
            ParameterValue::String(s) => write!(f, "{}", s),
        }
    }
}

/// A named, reusable, ordered sequence of steps. Immutable once defined;
/// expanded inline into referencing jobs at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandDefinition {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<Step>,
}

/// A parameter declared by a command, bound by `invoke` arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub parameter_type: ParameterType,
    #[serde(default)]
    pub default: Option<ParameterValue>,
}

/// One step of a job. Steps execute strictly in order; the first failure
/// stops the sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Run a command line in the job's environment.
    Run(RunStep),
    /// Invoke a named command; only valid before expansion.
    Invoke(InvokeStep),
    /// Restore the workflow workspace snapshot into the run environment.
    AttachWorkspace(AttachWorkspaceStep),
    /// Snapshot the named paths into workflow-scoped storage.
    PersistWorkspace(PersistWorkspaceStep),
    /// Copy a path into durable, invocation-scoped storage.
    StoreArtifact(StoreArtifactStep),
}

/// A `run` step: either a bare command line or a detailed form with a
/// display name, timeouts, and failure handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunStep {
    Command(String),
    Detailed(RunStepDetail),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunStepDetail {
    #[serde(default)]
    pub name: Option<String>,
    pub command: String,
    /// Hard wall-clock limit for this step.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Quiet-period limit: kill the step if it produces no output for this
    /// long. Falls back to the runner default when absent.
    #[serde(default)]
    pub no_output_timeout_seconds: Option<u64>,
    /// Do not fail the job run on a non-zero exit.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl RunStep {
    pub fn command(&self) -> &str {
        match self {
            RunStep::Command(c) => c,
            RunStep::Detailed(d) => &d.command,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            RunStep::Command(c) => c,
            RunStep::Detailed(d) => d.name.as_deref().unwrap_or(&d.command),
        }
    }

    pub fn timeout_seconds(&self) -> Option<u64> {
        match self {
            RunStep::Command(_) => None,
            RunStep::Detailed(d) => d.timeout_seconds,
        }
    }

    pub fn no_output_timeout_seconds(&self) -> Option<u64> {
        match self {
            RunStep::Command(_) => None,
            RunStep::Detailed(d) => d.no_output_timeout_seconds,
        }
    }

    pub fn continue_on_error(&self) -> bool {
        match self {
            RunStep::Command(_) => false,
            RunStep::Detailed(d) => d.continue_on_error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvokeStep {
    pub command: String,
    #[serde(default)]
    pub arguments: HashMap<String, ParameterValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachWorkspaceStep {
    /// Restore into this directory relative to the run environment's
    /// working directory; defaults to the working directory itself.
    #[serde(default)]
    pub at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistWorkspaceStep {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreArtifactStep {
    pub path: String,
    /// Stable name under which the artifact is stored; defaults to the
    /// final component of `path`.
    #[serde(default)]
    pub destination: Option<String>,
}

/// A job template. Each workflow reference produces one job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDefinition {
    pub name: String,
    pub executor: ExecutorSpec,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<Step>,
}

impl JobDefinition {
    /// Whether any step restores the workflow workspace.
    pub fn attaches_workspace(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, Step::AttachWorkspace(_)))
    }

    /// Whether any step persists the workflow workspace.
    pub fn persists_workspace(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, Step::PersistWorkspace(_)))
    }
}

/// Executor specification: a container image or a full machine, plus a
/// named resource class (an opaque CPU/memory tier looked up by the
/// runner). Exactly one of `image` and `machine` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub machine: Option<String>,
    #[serde(default = "default_resource_class")]
    pub resource_class: String,
}

fn default_resource_class() -> String {
    "medium".to_string()
}

/// A named DAG of job references with filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    pub name: String,
    /// Eligibility predicate over resolved parameters; absent means always
    /// eligible.
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub when: Option<Predicate>,
    pub jobs: Vec<WorkflowJob>,
}

/// One job reference within a workflow, carrying its filters and
/// dependency edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowJob {
    pub job: String,
    #[serde(default)]
    pub requires: Vec<String>,
    /// Branch glob patterns; empty means "always match".
    #[serde(default)]
    pub branches: Vec<String>,
    /// Per-reference parameter guard.
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub when: Option<Predicate>,
}
