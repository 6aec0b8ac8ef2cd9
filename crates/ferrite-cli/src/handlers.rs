//! Command handlers.

use console::style;
use ferrite_core::definition::{ParameterType, ParameterValue, PipelineDefinition};
use ferrite_core::ports::BlobStore;
use ferrite_core::trigger::TriggerContext;
use ferrite_core::{Error, Result, validate};
use ferrite_runner::{LocalBackend, RunnerConfig};
use ferrite_scheduler::{Scheduler, SchedulerConfig};
use ferrite_store::{ArtifactStore, FilesystemStore, WorkspaceStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::report;
use crate::sink::ConsoleSink;

async fn load(path: &Path) -> Result<PipelineDefinition> {
    let text = tokio::fs::read_to_string(path).await?;
    PipelineDefinition::from_yaml(&text)
}

pub async fn validate(path: &Path) -> Result<bool> {
    let definition = load(path).await?;
    match validate::validate(&definition) {
        Ok(expanded) => {
            println!("{} {} is valid", style("✓").green(), path.display());
            println!("  Parameters: {}", expanded.parameters.len());
            println!("  Jobs: {}", expanded.jobs.len());
            for workflow in &expanded.workflows {
                println!(
                    "  Workflow {} ({} jobs)",
                    style(&workflow.name).bold(),
                    workflow.jobs.len()
                );
            }
            Ok(true)
        }
        Err(e) => {
            println!("{} {} is invalid: {}", style("✗").red(), path.display(), e);
            Ok(false)
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    path: PathBuf,
    branch: String,
    commit: String,
    params: Vec<String>,
    max_concurrency: usize,
    data_dir: Option<PathBuf>,
    json: bool,
) -> Result<bool> {
    let definition = load(&path).await?;

    let mut trigger = TriggerContext::new(branch, commit);
    for raw in &params {
        let (name, value) = coerce_parameter(&definition, raw)?;
        trigger = trigger.with_parameter(name, value);
    }

    let data_dir = data_dir.unwrap_or_else(|| std::env::temp_dir().join("ferrite"));
    let store: Arc<dyn BlobStore> = Arc::new(FilesystemStore::new(data_dir.join("blobs")));
    let runner = RunnerConfig {
        data_dir: data_dir.join("runs"),
        ..RunnerConfig::default()
    };
    let scheduler = Scheduler::new(
        Arc::new(LocalBackend::new(runner.clone())),
        WorkspaceStore::new(store.clone()),
        ArtifactStore::new(store),
        Arc::new(ConsoleSink::new(!json)),
        runner,
        SchedulerConfig { max_concurrency },
    );

    let report = scheduler.run_invocation(&definition, &trigger).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report).map_err(Error::from)?);
    } else {
        report::print_report(&report);
    }
    Ok(report.status == ferrite_core::run::WorkflowStatus::Success)
}

/// Parse a `name=value` override, coercing the value to the declared
/// parameter type.
fn coerce_parameter(
    definition: &PipelineDefinition,
    raw: &str,
) -> Result<(String, ParameterValue)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| Error::Trigger(format!("expected name=value, got {:?}", raw)))?;
    let declared = definition
        .parameters
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| Error::Trigger(format!("unknown parameter override: {}", name)))?;
    let value = match declared.parameter_type {
        ParameterType::Boolean => match value {
            "true" => ParameterValue::Boolean(true),
            "false" => ParameterValue::Boolean(false),
            other => {
                return Err(Error::Trigger(format!(
                    "parameter {} expects true or false, got {:?}",
                    name, other
                )));
            }
        },
        ParameterType::String => ParameterValue::String(value.to_string()),
    };
    Ok((name.to_string(), value))
}
