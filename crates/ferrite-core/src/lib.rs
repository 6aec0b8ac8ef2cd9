//! Ferrite CI Core
//!
//! Core domain types, traits, and error handling for Ferrite CI.
//! This crate defines the shared vocabulary used across all other crates:
//! the pipeline definition model, the predicate language, trigger
//! resolution, run statuses, lifecycle events, and the port traits that
//! external adapters plug into.

pub mod definition;
pub mod error;
pub mod events;
pub mod expand;
pub mod ids;
pub mod ports;
pub mod predicate;
pub mod run;
pub mod trigger;
pub mod validate;

pub use error::{Error, Result};
pub use ids::*;
