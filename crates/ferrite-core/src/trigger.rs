//! Trigger context and parameter resolution.

use crate::definition::{ParameterDefinition, ParameterValue};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The external event that starts a pipeline invocation. Produced once per
/// invocation; read-only input to the evaluator and to filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerContext {
    pub branch: String,
    pub commit: String,
    /// Explicit parameter overrides supplied by the caller.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
}

impl TriggerContext {
    pub fn new(branch: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            commit: commit.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// Resolve declared parameters against trigger overrides. An explicit
/// override wins over the default; an unknown name or type mismatch is a
/// trigger error, reported before any job run is created.
pub fn resolve_parameters(
    declared: &[ParameterDefinition],
    trigger: &TriggerContext,
) -> Result<BTreeMap<String, ParameterValue>> {
    let mut resolved: BTreeMap<String, ParameterValue> = declared
        .iter()
        .map(|p| (p.name.clone(), p.default.clone()))
        .collect();

    for (name, value) in &trigger.parameters {
        let Some(declaration) = declared.iter().find(|p| &p.name == name) else {
            return Err(Error::Trigger(format!(
                "unknown parameter override: {}",
                name
            )));
        };
        if value.parameter_type() != declaration.parameter_type {
            return Err(Error::Trigger(format!(
                "parameter {} expects {:?}, got {:?}",
                name,
                declaration.parameter_type,
                value.parameter_type()
            )));
        }
        resolved.insert(name.clone(), value.clone());
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ParameterType;

    fn declared() -> Vec<ParameterDefinition> {
        vec![
            ParameterDefinition {
                name: "release".into(),
                parameter_type: ParameterType::Boolean,
                default: ParameterValue::Boolean(false),
            },
            ParameterDefinition {
                name: "channel".into(),
                parameter_type: ParameterType::String,
                default: ParameterValue::String("stable".into()),
            },
        ]
    }

    #[test]
    fn test_defaults_apply() {
        let trigger = TriggerContext::new("main", "abc123");
        let resolved = resolve_parameters(&declared(), &trigger).unwrap();
        assert_eq!(resolved["release"], ParameterValue::Boolean(false));
        assert_eq!(resolved["channel"], ParameterValue::String("stable".into()));
    }

    #[test]
    fn test_override_wins() {
        let trigger = TriggerContext::new("main", "abc123")
            .with_parameter("release", ParameterValue::Boolean(true));
        let resolved = resolve_parameters(&declared(), &trigger).unwrap();
        assert_eq!(resolved["release"], ParameterValue::Boolean(true));
    }

    #[test]
    fn test_unknown_override_rejected() {
        let trigger = TriggerContext::new("main", "abc123")
            .with_parameter("relaese", ParameterValue::Boolean(true));
        assert!(matches!(
            resolve_parameters(&declared(), &trigger),
            Err(Error::Trigger(_))
        ));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let trigger = TriggerContext::new("main", "abc123")
            .with_parameter("release", ParameterValue::String("yes".into()));
        assert!(matches!(
            resolve_parameters(&declared(), &trigger),
            Err(Error::Trigger(_))
        ));
    }
}
