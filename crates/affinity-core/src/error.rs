//! Error taxonomy for the scheduling core.
//!
//! Every fallible operation in the workspace funnels into `CoreError`.
//! Registry operations propagate to the caller; firing-time errors are
//! contained inside the firing that produced them (the worker records the
//! outcome and moves on).

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the scheduling core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed cron expression or unknown timezone. Never retried.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Trigger, workflow, or history target does not exist or the caller
    /// has no access to it.
    #[error("{0} not found")]
    NotFound(String),

    /// Secret or token mismatch. Deliberately carries no detail about
    /// which part of the check failed.
    #[error("unauthorized")]
    Unauthorized,

    /// The workflow execution endpoint failed or reported failure.
    #[error("workflow invocation failed: {0}")]
    Invocation(String),

    /// Durable store read/write failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Bad configuration file or flags.
    #[error("config error: {0}")]
    Config(String),
}

impl CoreError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSchedule(_) => "INVALID_SCHEDULE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Invocation(_) => "INVOCATION_FAILED",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}
