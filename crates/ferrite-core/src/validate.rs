//! Structural validation of pipeline definitions.
//!
//! Validation runs after parsing and before any scheduling. It expands
//! command references inline, then checks every invariant of the model;
//! a failure halts the invocation with a precise location, never a
//! partial or best-effort graph.

use crate::definition::{JobDefinition, PipelineDefinition, WorkflowDefinition};
use crate::expand::expand_commands;
use crate::predicate::Predicate;
use crate::{Error, Result};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Validate a parsed pipeline definition. On success returns the expanded
/// definition (no `invoke` steps remain) ready for scheduling.
pub fn validate(definition: &PipelineDefinition) -> Result<PipelineDefinition> {
    check_unique_names(definition)?;
    check_parameter_defaults(definition)?;
    check_executors(definition)?;

    let expanded = expand_commands(definition)?;

    for workflow in &expanded.workflows {
        check_workflow(&expanded, workflow)?;
    }
    check_parameter_references(&expanded)?;

    Ok(expanded)
}

fn check_unique_names(definition: &PipelineDefinition) -> Result<()> {
    let mut seen = HashSet::new();
    for parameter in &definition.parameters {
        if !seen.insert(&parameter.name) {
            return Err(Error::definition(
                &parameter.name,
                "duplicate parameter name",
            ));
        }
    }

    let mut seen = HashSet::new();
    for command in &definition.commands {
        if !seen.insert(&command.name) {
            return Err(Error::definition(&command.name, "duplicate command name"));
        }
    }

    let mut seen = HashSet::new();
    for job in &definition.jobs {
        if !seen.insert(&job.name) {
            return Err(Error::definition(&job.name, "duplicate job name"));
        }
    }

    let mut seen = HashSet::new();
    for workflow in &definition.workflows {
        if !seen.insert(&workflow.name) {
            return Err(Error::definition(
                &workflow.name,
                "duplicate workflow name",
            ));
        }
    }

    Ok(())
}

/// A declared default must carry the declared type, for pipeline and
/// command parameters alike.
fn check_parameter_defaults(definition: &PipelineDefinition) -> Result<()> {
    for parameter in &definition.parameters {
        if parameter.default.parameter_type() != parameter.parameter_type {
            return Err(Error::definition(
                &parameter.name,
                format!(
                    "default value is {:?} but the declared type is {:?}",
                    parameter.default.parameter_type(),
                    parameter.parameter_type
                ),
            ));
        }
    }
    for command in &definition.commands {
        for parameter in &command.parameters {
            if let Some(default) = &parameter.default
                && default.parameter_type() != parameter.parameter_type
            {
                return Err(Error::definition(
                    &command.name,
                    format!(
                        "parameter {} default value is {:?} but the declared type is {:?}",
                        parameter.name,
                        default.parameter_type(),
                        parameter.parameter_type
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn check_executors(definition: &PipelineDefinition) -> Result<()> {
    for job in &definition.jobs {
        let spec = &job.executor;
        match (&spec.image, &spec.machine) {
            (Some(_), Some(_)) => {
                return Err(Error::definition(
                    &job.name,
                    "executor declares both image and machine",
                ));
            }
            (None, None) => {
                return Err(Error::definition(
                    &job.name,
                    "executor declares neither image nor machine",
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_workflow(definition: &PipelineDefinition, workflow: &WorkflowDefinition) -> Result<()> {
    if workflow.jobs.is_empty() {
        return Err(Error::definition(&workflow.name, "workflow has no jobs"));
    }

    // Resolve job references and build the dependency graph in declaration
    // order so downstream checks are deterministic.
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut name_to_index: HashMap<&str, NodeIndex> = HashMap::new();

    for (position, reference) in workflow.jobs.iter().enumerate() {
        if definition.job(&reference.job).is_none() {
            return Err(Error::definition(
                &workflow.name,
                format!("workflow references unknown job: {}", reference.job),
            ));
        }
        if name_to_index.contains_key(reference.job.as_str()) {
            return Err(Error::definition(
                &workflow.name,
                format!("job {} referenced more than once", reference.job),
            ));
        }
        let idx = graph.add_node(position);
        name_to_index.insert(reference.job.as_str(), idx);
    }

    for reference in &workflow.jobs {
        let to = name_to_index[reference.job.as_str()];
        for dependency in &reference.requires {
            let Some(&from) = name_to_index.get(dependency.as_str()) else {
                return Err(Error::definition(
                    &workflow.name,
                    format!(
                        "job {} requires {}, which is not in the workflow",
                        reference.job, dependency
                    ),
                ));
            };
            graph.add_edge(from, to, ());
        }
    }

    if toposort(&graph, None).is_err() {
        return Err(Error::definition(
            &workflow.name,
            "cycle detected in job dependencies",
        ));
    }

    check_workspace_roles(definition, workflow, &graph, &name_to_index)
}

/// At most one job run per workflow invocation may persist the shared
/// workspace, and every consumer must have the producer as an ancestor in
/// the DAG.
fn check_workspace_roles(
    definition: &PipelineDefinition,
    workflow: &WorkflowDefinition,
    graph: &DiGraph<usize, ()>,
    name_to_index: &HashMap<&str, NodeIndex>,
) -> Result<()> {
    let job_of = |name: &str| -> &JobDefinition {
        definition.job(name).expect("references checked above")
    };

    let producers: Vec<&str> = workflow
        .jobs
        .iter()
        .map(|r| r.job.as_str())
        .filter(|name| job_of(name).persists_workspace())
        .collect();

    if producers.len() > 1 {
        return Err(Error::definition(
            &workflow.name,
            format!(
                "multiple jobs persist the workspace: {}",
                producers.join(", ")
            ),
        ));
    }

    for reference in &workflow.jobs {
        if !job_of(&reference.job).attaches_workspace() {
            continue;
        }
        let Some(&producer) = producers.first() else {
            return Err(Error::definition(
                &workflow.name,
                format!(
                    "job {} attaches a workspace but no job persists one",
                    reference.job
                ),
            ));
        };
        let from = name_to_index[producer];
        let to = name_to_index[reference.job.as_str()];
        if !has_path_connecting(graph, from, to, None) {
            return Err(Error::definition(
                &workflow.name,
                format!(
                    "job {} attaches the workspace but {} is not an ancestor",
                    reference.job, producer
                ),
            ));
        }
    }

    Ok(())
}

/// Predicates may only reference declared parameters.
fn check_parameter_references(definition: &PipelineDefinition) -> Result<()> {
    let declared: HashSet<&str> = definition
        .parameters
        .iter()
        .map(|p| p.name.as_str())
        .collect();

    let check = |location: &str, predicate: &Predicate| -> Result<()> {
        for name in predicate.referenced_parameters() {
            if !declared.contains(name) {
                return Err(Error::definition(
                    location,
                    format!("predicate references undeclared parameter: {}", name),
                ));
            }
        }
        Ok(())
    };

    for workflow in &definition.workflows {
        if let Some(when) = &workflow.when {
            check(&workflow.name, when)?;
        }
        for reference in &workflow.jobs {
            if let Some(when) = &reference.when {
                check(&workflow.name, when)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
version: "1"
parameters:
  - name: release
    type: boolean
    default: false
jobs:
  - name: build
    executor:
      image: rust:1.82
    steps:
      - run: cargo build
      - persist_workspace:
          paths: [target]
  - name: test
    executor:
      image: rust:1.82
    steps:
      - attach_workspace: {}
      - run: cargo test
  - name: publish
    executor:
      machine: linux
    steps:
      - attach_workspace: {}
      - run: ./publish.sh
workflows:
  - name: ci
    jobs:
      - job: build
      - job: test
        requires: [build]
      - job: publish
        requires: [test]
        when:
          parameter: release
"#;

    fn parse(yaml: &str) -> PipelineDefinition {
        PipelineDefinition::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_valid_pipeline_accepted() {
        assert!(validate(&parse(VALID)).is_ok());
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let yaml = VALID.replace("name: test\n    executor", "name: build\n    executor");
        let err = validate(&parse(&yaml)).unwrap_err();
        assert!(err.to_string().contains("duplicate job name"));
    }

    #[test]
    fn test_parameter_default_must_match_declared_type() {
        // `release` keeps its boolean default but is redeclared as string.
        let yaml = VALID.replace("type: boolean", "type: string");
        let err = validate(&parse(&yaml)).unwrap_err();
        assert!(err.to_string().contains("default value"));
    }

    #[test]
    fn test_dangling_job_reference_rejected() {
        let yaml = VALID.replace("- job: test\n", "- job: tset\n");
        let err = validate(&parse(&yaml)).unwrap_err();
        assert!(err.to_string().contains("unknown job"));
    }

    #[test]
    fn test_dangling_requires_rejected() {
        let yaml = VALID.replace("requires: [build]", "requires: [bulid]");
        let err = validate(&parse(&yaml)).unwrap_err();
        assert!(err.to_string().contains("not in the workflow"));
    }

    #[test]
    fn test_cycle_rejected() {
        let yaml = VALID.replace("- job: build\n", "- job: build\n        requires: [publish]\n");
        let err = validate(&parse(&yaml)).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_two_workspace_producers_rejected() {
        let yaml = VALID.replace(
            "      - attach_workspace: {}\n      - run: cargo test",
            "      - run: cargo test\n      - persist_workspace:\n          paths: [reports]",
        );
        let err = validate(&parse(&yaml)).unwrap_err();
        assert!(err.to_string().contains("multiple jobs persist"));
    }

    #[test]
    fn test_consumer_without_producer_ancestor_rejected() {
        // publish no longer depends (transitively) on build.
        let yaml = VALID.replace("requires: [test]", "requires: []");
        let err = validate(&parse(&yaml)).unwrap_err();
        assert!(err.to_string().contains("not an ancestor"));
    }

    #[test]
    fn test_undeclared_predicate_parameter_rejected() {
        let yaml = VALID.replace("parameter: release", "parameter: releaze");
        let err = validate(&parse(&yaml)).unwrap_err();
        assert!(err.to_string().contains("undeclared parameter"));
    }

    #[test]
    fn test_executor_requires_exactly_one_kind() {
        let yaml = VALID.replace(
            "executor:\n      machine: linux",
            "executor:\n      machine: linux\n      image: rust:1.82",
        );
        let err = validate(&parse(&yaml)).unwrap_err();
        assert!(err.to_string().contains("both image and machine"));
    }
}
