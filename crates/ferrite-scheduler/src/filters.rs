//! Workflow eligibility and per-reference job filters.

use ferrite_core::definition::{ParameterValue, PipelineDefinition, WorkflowDefinition, WorkflowJob};
use ferrite_core::run::RunReason;
use std::collections::BTreeMap;

/// Workflows eligible for this invocation, in declaration order.
pub fn eligible_workflows<'a>(
    definition: &'a PipelineDefinition,
    parameters: &BTreeMap<String, ParameterValue>,
) -> Vec<&'a WorkflowDefinition> {
    definition
        .workflows
        .iter()
        .filter(|w| w.when.as_ref().is_none_or(|p| p.eval(parameters)))
        .collect()
}

/// Why a job reference is skipped before dispatch, if at all. Branch
/// filters are checked before parameter guards.
pub fn skip_reason(
    job_ref: &WorkflowJob,
    branch: &str,
    parameters: &BTreeMap<String, ParameterValue>,
) -> Option<RunReason> {
    if !branch_matches(&job_ref.branches, branch) {
        return Some(RunReason::BranchFiltered);
    }
    if let Some(when) = &job_ref.when
        && !when.eval(parameters)
    {
        return Some(RunReason::ParameterFiltered);
    }
    None
}

/// An empty pattern list matches every branch.
pub fn branch_matches(patterns: &[String], branch: &str) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|p| glob_match(p, branch))
}

fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text.starts_with(prefix);
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix_slash = format!("{}/", prefix);
        if text.starts_with(&prefix_slash) {
            return !text[prefix_slash.len()..].contains('/');
        }
        return false;
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            return text.starts_with(parts[0]) && text.ends_with(parts[1]);
        }
    }
    pattern == text
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_core::predicate::Predicate;

    #[test]
    fn test_branch_glob_matching() {
        assert!(branch_matches(&[], "anything"));
        assert!(branch_matches(&["main".to_string()], "main"));
        assert!(branch_matches(&["release/*".to_string()], "release/1.2"));
        assert!(!branch_matches(&["release/*".to_string()], "release/1.2/hotfix"));
        assert!(branch_matches(&["release/**".to_string()], "release/1.2/hotfix"));
        assert!(branch_matches(&["feature-*".to_string()], "feature-login"));
        assert!(!branch_matches(&["main".to_string()], "develop"));
    }

    #[test]
    fn test_branch_filter_wins_over_parameter_guard() {
        let job_ref = WorkflowJob {
            job: "deploy".to_string(),
            requires: vec![],
            branches: vec!["main".to_string()],
            when: Some(Predicate::Literal(false)),
        };
        let parameters = BTreeMap::new();

        assert_eq!(
            skip_reason(&job_ref, "develop", &parameters),
            Some(RunReason::BranchFiltered)
        );
        assert_eq!(
            skip_reason(&job_ref, "main", &parameters),
            Some(RunReason::ParameterFiltered)
        );
    }

    #[test]
    fn test_no_filters_means_no_skip() {
        let job_ref = WorkflowJob {
            job: "build".to_string(),
            requires: vec![],
            branches: vec![],
            when: None,
        };
        assert_eq!(skip_reason(&job_ref, "any", &BTreeMap::new()), None);
    }
}
