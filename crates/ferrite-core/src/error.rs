//! Error types for Ferrite CI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Definition errors: structural violations in the pipeline document,
    // detected before any execution.
    #[error("invalid pipeline definition at {location}: {message}")]
    Definition { location: String, message: String },

    // Trigger errors: unresolvable or mistyped parameter overrides,
    // fatal before scheduling.
    #[error("invalid trigger: {0}")]
    Trigger(String),

    // Step errors
    #[error("step failed with exit code {exit_code}")]
    StepFailed { exit_code: i32 },

    #[error("step timed out after {seconds}s")]
    StepTimeout { seconds: u64 },

    #[error("step produced no output for {seconds}s")]
    StepStalled { seconds: u64 },

    #[error("job run exceeded wall-clock ceiling of {seconds}s")]
    JobTimeout { seconds: u64 },

    // Environment provisioning
    #[error("failed to provision run environment: {0}")]
    Provisioning(String),

    // Workspace / artifact errors
    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("storage backend error: {0}")]
    Storage(String),

    // Cancellation
    #[error("invocation cancelled")]
    Cancelled,

    // Infrastructure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a definition error anchored to a job or workflow name.
    pub fn definition(location: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Definition {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
