//! Core domain errors.

use thiserror::Error;

use crate::TaskState;

/// Core domain errors for JobRun.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The identifier is not in the expected shape.
    #[error("Invalid task id: {0}")]
    InvalidTaskId(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: TaskState, to: TaskState },
}
