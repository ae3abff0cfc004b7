//! Kind, state and execution class enums for Tasks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// What a Task does. Informational, except that backup and restore tasks on
/// the same working resource are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// Copy a working directory out to a backup location.
    Backup,
    /// Copy a backup back into the working directory.
    Restore,
    /// Execute a geospatial process.
    Process,
}

impl TaskKind {
    /// All kinds, in reporting order.
    pub fn all() -> &'static [TaskKind] {
        &[TaskKind::Backup, TaskKind::Restore, TaskKind::Process]
    }

    /// Returns true if tasks of this kind that share a working resource must
    /// run one at a time.
    pub fn serializes_on_resource(&self) -> bool {
        matches!(self, Self::Backup | Self::Restore)
    }

    /// Lowercase name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status of a Task in the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Task accepted, waiting for a worker slot.
    #[default]
    Submitted,
    /// Job body is executing.
    Running,
    /// Job body returned successfully.
    Completed,
    /// Job body returned an error.
    Failed,
    /// Task was cancelled before or during execution.
    Stopped,
}

impl TaskState {
    /// All states, in lifecycle order.
    pub fn all() -> &'static [TaskState] {
        &[
            TaskState::Submitted,
            TaskState::Running,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Stopped,
        ]
    }

    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Submitted, Self::Running)
                | (Self::Submitted, Self::Stopped)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Stopped)
        )
    }

    /// Check a transition, returning an error naming both ends if it is not allowed.
    pub fn validate_transition(&self, next: TaskState) -> Result<(), CoreError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidStateTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Lowercase name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Execution class. Each class has its own concurrency quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionClass {
    /// A caller is waiting on the outcome.
    Sync,
    /// Fire and poll.
    Async,
}

impl ExecutionClass {
    /// Both classes.
    pub fn all() -> &'static [ExecutionClass] {
        &[ExecutionClass::Sync, ExecutionClass::Async]
    }

    /// Lowercase name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

impl fmt::Display for ExecutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Submitted.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Stopped.is_terminal());
    }

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(TaskState::Submitted.can_transition_to(TaskState::Running));
        assert!(TaskState::Submitted.can_transition_to(TaskState::Stopped));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(TaskState::Running.can_transition_to(TaskState::Failed));
        assert!(TaskState::Running.can_transition_to(TaskState::Stopped));
    }

    #[test]
    fn test_no_state_is_revisited() {
        for from in TaskState::all() {
            assert!(!from.can_transition_to(*from), "{from} -> {from}");
            assert!(!from.can_transition_to(TaskState::Submitted));
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in TaskState::all().iter().filter(|s| s.is_terminal()) {
            for to in TaskState::all() {
                let err = from.validate_transition(*to).unwrap_err();
                assert_eq!(
                    err,
                    CoreError::InvalidStateTransition { from: *from, to: *to }
                );
            }
        }
    }

    #[test]
    fn test_submitted_cannot_complete_directly() {
        assert!(!TaskState::Submitted.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Submitted.can_transition_to(TaskState::Failed));
    }

    #[test]
    fn test_only_backup_and_restore_serialize() {
        assert!(TaskKind::Backup.serializes_on_resource());
        assert!(TaskKind::Restore.serializes_on_resource());
        assert!(!TaskKind::Process.serializes_on_resource());
    }
}
