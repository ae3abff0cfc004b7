//! Engine and job body errors.

use std::time::Duration;

use thiserror::Error;

use jobrun_core::{CoreError, OutputId, TaskId};

/// Errors returned by the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The identifier is not in the expected shape.
    #[error("Invalid task id: {0}")]
    InvalidId(String),

    /// Well-formed id, but no task is known under it.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// No stored result under the given key.
    #[error(
        "Result '{output_id}' of execution {task_id} not found: either the execution was never \
         submitted or too much time elapsed since the process completed"
    )]
    ResultNotFound { task_id: TaskId, output_id: OutputId },

    /// A bounded synchronous submission did not get a worker slot in time.
    #[error("No synchronous worker slot became available for task {task_id} within {waited:?}")]
    Capacity { task_id: TaskId, waited: Duration },

    /// The engine no longer admits work.
    #[error("Job engine is shut down")]
    ShuttingDown,

    /// The engine was started outside a tokio runtime.
    #[error("JobEngine must be started from within a tokio runtime")]
    NoRuntime,

    /// Domain rule violated.
    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTaskId(id) => Self::InvalidId(id),
            other => Self::Core(other),
        }
    }
}

/// Errors a job body reports back to the engine.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job body observed its cancellation token and unwound.
    #[error("Job cancelled")]
    Cancelled,

    /// The job body failed.
    #[error("{0}")]
    Failed(String),

    /// The job body hit an I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Create a failure from any displayable cause.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_id_maps_from_core() {
        let err: EngineError = CoreError::InvalidTaskId("abc".to_string()).into();
        assert!(matches!(err, EngineError::InvalidId(ref id) if id == "abc"));
    }

    #[test]
    fn test_result_not_found_wording() {
        let err = EngineError::ResultNotFound {
            task_id: TaskId::generate(),
            output_id: OutputId::default(),
        };
        let msg = err.to_string();
        assert!(msg.contains("either the execution was never submitted"));
        assert!(msg.contains("too much time elapsed since the process completed"));
    }

    #[test]
    fn test_job_error_from_io() {
        let err: JobError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.to_string(), "I/O error: gone");
    }
}
