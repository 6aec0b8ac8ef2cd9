//! Command expansion.
//!
//! Reusable commands are pure macros: every `invoke` step is replaced by
//! the command's step list at load time, with `<< parameters.x >>`
//! placeholders substituted from the invocation arguments. No runtime
//! indirection and no shared mutable command state survive expansion.

use crate::definition::{
    AttachWorkspaceStep, CommandDefinition, ParameterValue, PersistWorkspaceStep,
    PipelineDefinition, RunStep, RunStepDetail, Step, StoreArtifactStep,
};
use crate::{Error, Result};
use regex::Regex;
use std::collections::HashMap;

/// Expand every `invoke` step in every job. Returns a definition whose
/// jobs contain no `invoke` steps.
pub fn expand_commands(definition: &PipelineDefinition) -> Result<PipelineDefinition> {
    let mut expanded = definition.clone();
    for job in &mut expanded.jobs {
        let mut stack = Vec::new();
        job.steps = expand_steps(&job.name, &job.steps, &definition.commands, &mut stack)?;
    }
    Ok(expanded)
}

fn expand_steps(
    location: &str,
    steps: &[Step],
    commands: &[CommandDefinition],
    stack: &mut Vec<String>,
) -> Result<Vec<Step>> {
    let mut out = Vec::with_capacity(steps.len());
    for step in steps {
        match step {
            Step::Invoke(invoke) => {
                let command = commands
                    .iter()
                    .find(|c| c.name == invoke.command)
                    .ok_or_else(|| {
                        Error::definition(
                            location,
                            format!("invoke references unknown command: {}", invoke.command),
                        )
                    })?;

                if stack.iter().any(|name| name == &command.name) {
                    return Err(Error::definition(
                        location,
                        format!("recursive command invocation: {}", command.name),
                    ));
                }

                let bindings = bind_arguments(location, command, &invoke.arguments)?;
                stack.push(command.name.clone());
                let inner = expand_steps(location, &command.steps, commands, stack)?;
                stack.pop();

                for inner_step in inner {
                    out.push(substitute_step(location, inner_step, &bindings)?);
                }
            }
            other => out.push(other.clone()),
        }
    }
    Ok(out)
}

/// Match invocation arguments against the command's declared parameters.
fn bind_arguments(
    location: &str,
    command: &CommandDefinition,
    arguments: &HashMap<String, ParameterValue>,
) -> Result<HashMap<String, String>> {
    for name in arguments.keys() {
        if !command.parameters.iter().any(|p| &p.name == name) {
            return Err(Error::definition(
                location,
                format!("command {} has no parameter {}", command.name, name),
            ));
        }
    }

    let mut bindings = HashMap::new();
    for parameter in &command.parameters {
        let value = arguments
            .get(&parameter.name)
            .cloned()
            .or_else(|| parameter.default.clone())
            .ok_or_else(|| {
                Error::definition(
                    location,
                    format!(
                        "command {} requires argument {}",
                        command.name, parameter.name
                    ),
                )
            })?;
        bindings.insert(parameter.name.clone(), value.to_string());
    }
    Ok(bindings)
}

fn substitute_step(
    location: &str,
    step: Step,
    bindings: &HashMap<String, String>,
) -> Result<Step> {
    Ok(match step {
        Step::Run(RunStep::Command(command)) => Step::Run(RunStep::Command(substitute(
            location, &command, bindings,
        )?)),
        Step::Run(RunStep::Detailed(detail)) => Step::Run(RunStep::Detailed(RunStepDetail {
            name: match detail.name {
                Some(name) => Some(substitute(location, &name, bindings)?),
                None => None,
            },
            command: substitute(location, &detail.command, bindings)?,
            ..detail
        })),
        Step::AttachWorkspace(attach) => Step::AttachWorkspace(AttachWorkspaceStep {
            at: match attach.at {
                Some(at) => Some(substitute(location, &at, bindings)?),
                None => None,
            },
        }),
        Step::PersistWorkspace(persist) => {
            let mut paths = Vec::with_capacity(persist.paths.len());
            for path in &persist.paths {
                paths.push(substitute(location, path, bindings)?);
            }
            Step::PersistWorkspace(PersistWorkspaceStep { paths })
        }
        Step::StoreArtifact(store) => Step::StoreArtifact(StoreArtifactStep {
            path: substitute(location, &store.path, bindings)?,
            destination: match store.destination {
                Some(dest) => Some(substitute(location, &dest, bindings)?),
                None => None,
            },
        }),
        // Nested invokes were expanded before substitution.
        Step::Invoke(_) => step,
    })
}

/// Replace `<< parameters.name >>` placeholders. Unbound placeholders are
/// definition errors rather than silently empty strings.
fn substitute(location: &str, input: &str, bindings: &HashMap<String, String>) -> Result<String> {
    let re = Regex::new(r"<<\s*parameters\.([A-Za-z0-9_-]+)\s*>>")
        .map_err(|e| Error::Internal(e.to_string()))?;

    let mut missing = None;
    let substituted = re.replace_all(input, |caps: &regex::Captures| {
        let name = caps.get(1).map_or("", |m| m.as_str());
        match bindings.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(Error::definition(
            location,
            format!("unbound command parameter: {}", name),
        ));
    }
    Ok(substituted.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::PipelineDefinition;

    fn pipeline(yaml: &str) -> PipelineDefinition {
        PipelineDefinition::from_yaml(yaml).unwrap()
    }

    const BASE: &str = r#"
version: "1"
commands:
  - name: setup
    parameters:
      - name: toolchain
        type: string
        default: stable
    steps:
      - run: rustup default << parameters.toolchain >>
jobs:
  - name: build
    executor:
      image: rust:1.82
    steps:
      - invoke:
          command: setup
          arguments:
            toolchain: nightly
      - run: cargo build
workflows:
  - name: ci
    jobs:
      - job: build
"#;

    #[test]
    fn test_inline_expansion_with_arguments() {
        let expanded = expand_commands(&pipeline(BASE)).unwrap();
        let build = expanded.job("build").unwrap();
        assert_eq!(build.steps.len(), 2);
        match &build.steps[0] {
            Step::Run(run) => assert_eq!(run.command(), "rustup default nightly"),
            other => panic!("expected run step, got {:?}", other),
        }
    }

    #[test]
    fn test_default_argument_applies() {
        let yaml = BASE.replace(
            "          arguments:\n            toolchain: nightly\n",
            "",
        );
        let expanded = expand_commands(&pipeline(&yaml)).unwrap();
        match &expanded.job("build").unwrap().steps[0] {
            Step::Run(run) => assert_eq!(run.command(), "rustup default stable"),
            other => panic!("expected run step, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        let yaml = BASE.replace("command: setup\n          arguments", "command: missing\n          arguments");
        let err = expand_commands(&pipeline(&yaml)).unwrap_err();
        assert!(err.to_string().contains("unknown command"));
    }

    #[test]
    fn test_unknown_argument_rejected() {
        let yaml = BASE.replace("toolchain: nightly", "toolchian: nightly");
        let err = expand_commands(&pipeline(&yaml)).unwrap_err();
        assert!(err.to_string().contains("no parameter"));
    }

    #[test]
    fn test_recursive_invocation_rejected() {
        let yaml = r#"
version: "1"
commands:
  - name: a
    steps:
      - invoke:
          command: b
  - name: b
    steps:
      - invoke:
          command: a
jobs:
  - name: build
    executor:
      machine: linux
    steps:
      - invoke:
          command: a
workflows:
  - name: ci
    jobs:
      - job: build
"#;
        let err = expand_commands(&pipeline(yaml)).unwrap_err();
        assert!(err.to_string().contains("recursive"));
    }
}
