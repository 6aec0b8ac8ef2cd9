//! The boolean predicate language used by workflow `when` clauses and
//! per-reference parameter guards.
//!
//! Modeled as a small AST evaluated once per job reference against the
//! immutable resolved parameters, rather than ad hoc string matching
//! scattered through the scheduler.

use crate::definition::ParameterValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// A constant.
    Literal(bool),
    /// True when the named parameter is truthy.
    Parameter(String),
    /// True when the named parameter equals the given value.
    Equals {
        parameter: String,
        value: ParameterValue,
    },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Evaluate against resolved parameters. Unknown parameter names
    /// evaluate false; validation reports them before scheduling.
    pub fn eval(&self, parameters: &BTreeMap<String, ParameterValue>) -> bool {
        match self {
            Predicate::Literal(b) => *b,
            Predicate::Parameter(name) => parameters
                .get(name)
                .map(ParameterValue::is_truthy)
                .unwrap_or(false),
            Predicate::Equals { parameter, value } => {
                parameters.get(parameter).is_some_and(|v| v == value)
            }
            Predicate::Not(inner) => !inner.eval(parameters),
            Predicate::And(all) => all.iter().all(|p| p.eval(parameters)),
            Predicate::Or(any) => any.iter().any(|p| p.eval(parameters)),
        }
    }

    /// Every parameter name referenced by this predicate.
    pub fn referenced_parameters(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_parameters(&mut names);
        names
    }

    fn collect_parameters<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Predicate::Literal(_) => {}
            Predicate::Parameter(name) => names.push(name),
            Predicate::Equals { parameter, .. } => names.push(parameter),
            Predicate::Not(inner) => inner.collect_parameters(names),
            Predicate::And(children) | Predicate::Or(children) => {
                for p in children {
                    p.collect_parameters(names);
                }
            }
        }
    }

    /// Whether two predicates are syntactic negations of each other over a
    /// single parameter, the shape produced by two mutually exclusive
    /// top-level workflows keyed by one boolean.
    pub fn negates(&self, other: &Predicate) -> bool {
        match (self, other) {
            (Predicate::Not(inner), p) | (p, Predicate::Not(inner)) => inner.as_ref() == p,
            _ => false,
        }
    }
}
