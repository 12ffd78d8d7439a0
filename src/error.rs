pub use anyhow::Error as RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KilnError {
    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error("Deferred configuration callback failed:\n{0}")]
    Configure(#[source] anyhow::Error),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Error while executing the task graph.\n{0}")]
    Build(#[from] BuildError),
}

/// Failures raised when reading a configuration scope.
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("Property '{0}' is not defined in this scope or any ancestor")]
    Missing(Box<str>),

    #[error("Property '{key}' holds a {found}, expected a {expected}")]
    Type {
        key: Box<str>,
        expected: &'static str,
        found: &'static str,
    },
}

/// Failures raised while resolving the requested task set.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Requested task '{0}' does not exist")]
    UnknownTask(String),

    #[error("Cycle detected in the task graph at '{0}'")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Task '{0}':\n{1}")]
    Task(String, anyhow::Error),
}
