//! Dependency graph over one workflow's job references.

use ferrite_core::definition::{WorkflowDefinition, WorkflowJob};
use ferrite_core::run::JobRunStatus;
use ferrite_core::{Error, Result};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Directed graph of the job references in a workflow. Node order follows
/// declaration order, which keeps every traversal here deterministic.
pub struct WorkflowDag {
    graph: DiGraph<WorkflowJob, ()>,
    by_name: HashMap<String, NodeIndex>,
}

impl WorkflowDag {
    /// Build the graph. Validation has already rejected unknown references
    /// and cycles; hitting either here is an internal error.
    pub fn build(workflow: &WorkflowDefinition) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut by_name = HashMap::new();

        for job_ref in &workflow.jobs {
            let idx = graph.add_node(job_ref.clone());
            by_name.insert(job_ref.job.clone(), idx);
        }
        for job_ref in &workflow.jobs {
            let to = by_name[&job_ref.job];
            for required in &job_ref.requires {
                let from = *by_name.get(required).ok_or_else(|| {
                    Error::Internal(format!("unresolved dependency {:?}", required))
                })?;
                graph.add_edge(from, to, ());
            }
        }
        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(Error::Internal("cyclic workflow graph".to_string()));
        }
        Ok(Self { graph, by_name })
    }

    /// Job references in declaration order.
    pub fn jobs(&self) -> impl Iterator<Item = &WorkflowJob> {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    /// Whether every direct dependency of `job` has reached a terminal
    /// status.
    pub fn is_ready(&self, job: &str, statuses: &HashMap<String, JobRunStatus>) -> bool {
        let Some(&idx) = self.by_name.get(job) else {
            return false;
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .all(|dep| {
                statuses
                    .get(&self.graph[dep].job)
                    .is_some_and(|s| s.is_terminal())
            })
    }

    /// Whether `ancestor` precedes `job` through any chain of `requires`
    /// edges.
    pub fn is_ancestor(&self, ancestor: &str, job: &str) -> bool {
        match (self.by_name.get(ancestor), self.by_name.get(job)) {
            (Some(&from), Some(&to)) => from != to && has_path_connecting(&self.graph, from, to, None),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_core::definition::PipelineDefinition;
    use pretty_assertions::assert_eq;

    fn workflow(yaml: &str) -> WorkflowDefinition {
        PipelineDefinition::from_yaml(yaml).unwrap().workflows.remove(0)
    }

    const CHAIN: &str = r#"
version: "1"
jobs:
  - name: build
    executor: { machine: linux }
    steps: [ { run: "make" } ]
  - name: test
    executor: { machine: linux }
    steps: [ { run: "make test" } ]
  - name: deploy
    executor: { machine: linux }
    steps: [ { run: "make deploy" } ]
workflows:
  - name: main
    jobs:
      - job: build
      - job: test
        requires: [build]
      - job: deploy
        requires: [test]
"#;

    #[test]
    fn test_linear_chain_readiness() {
        let dag = WorkflowDag::build(&workflow(CHAIN)).unwrap();
        let mut statuses = HashMap::new();

        assert!(dag.is_ready("build", &statuses));
        assert!(!dag.is_ready("test", &statuses));

        statuses.insert("build".to_string(), JobRunStatus::Success);
        assert!(dag.is_ready("test", &statuses));
        assert!(!dag.is_ready("deploy", &statuses));

        // A failed dependency is terminal and therefore unblocks.
        statuses.insert("test".to_string(), JobRunStatus::Failed);
        assert!(dag.is_ready("deploy", &statuses));
    }

    #[test]
    fn test_declaration_order_is_preserved() {
        let dag = WorkflowDag::build(&workflow(CHAIN)).unwrap();
        let names: Vec<&str> = dag.jobs().map(|j| j.job.as_str()).collect();
        assert_eq!(names, vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_ancestry_is_transitive() {
        let dag = WorkflowDag::build(&workflow(CHAIN)).unwrap();
        assert!(dag.is_ancestor("build", "deploy"));
        assert!(!dag.is_ancestor("deploy", "build"));
        assert!(!dag.is_ancestor("build", "build"));
    }
}
