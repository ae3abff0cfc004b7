//! Task and result reference types.

use crate::{CoreError, ExecutionClass, OutputId, ResourceKey, TaskId, TaskKind, TaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A Task is the engine's record of one submitted job body.
///
/// Values handed out by the engine are snapshots; mutating one has no effect
/// on the engine's copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// What the task does.
    pub kind: TaskKind,

    /// Which quota the task is admitted under.
    pub execution_class: ExecutionClass,

    /// Optional display name (e.g. the process name).
    pub name: Option<String>,

    /// Current task state.
    pub state: TaskState,

    /// When the task was submitted.
    pub submitted_at: DateTime<Utc>,

    /// When the task was granted a worker slot.
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// Failure cause; only set in state Failed.
    pub error: Option<String>,

    /// Outputs that can be fetched; only set in state Completed.
    pub result_ref: Option<ResultRef>,

    /// Resource the job body operates on.
    pub working_resource: Option<ResourceKey>,

    /// Free-form labels supplied by the submitter.
    pub labels: HashMap<String, String>,
}

impl Task {
    /// Create a new Task in state Submitted.
    pub fn new(kind: TaskKind, execution_class: ExecutionClass) -> Self {
        Self {
            id: TaskId::generate(),
            kind,
            execution_class,
            name: None,
            state: TaskState::Submitted,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result_ref: None,
            working_resource: None,
            labels: HashMap::new(),
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Mark the task as running.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.state.validate_transition(TaskState::Running)?;
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as completed.
    pub fn complete(&mut self, result_ref: Option<ResultRef>) -> Result<(), CoreError> {
        self.finish(TaskState::Completed)?;
        self.result_ref = result_ref;
        Ok(())
    }

    /// Mark the task as failed.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.finish(TaskState::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Mark the task as stopped.
    pub fn stop(&mut self) -> Result<(), CoreError> {
        self.finish(TaskState::Stopped)
    }

    fn finish(&mut self, state: TaskState) -> Result<(), CoreError> {
        self.state.validate_transition(state)?;
        self.state = state;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Returns true if the task finished more than `retention` before `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        let Some(completed_at) = self.completed_at else {
            return false;
        };
        match chrono::Duration::from_std(retention) {
            Ok(retention) => now.signed_duration_since(completed_at) > retention,
            Err(_) => false,
        }
    }
}

/// Reference to the outputs of a completed task held in the result store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRef {
    /// Task that produced the outputs.
    pub task_id: TaskId,

    /// Ids of the outputs that can be fetched.
    pub outputs: Vec<OutputId>,
}

impl ResultRef {
    /// Create a new ResultRef.
    pub fn new(task_id: TaskId, outputs: Vec<OutputId>) -> Self {
        Self { task_id, outputs }
    }

    /// Check whether the task produced the given output.
    pub fn contains(&self, output_id: &OutputId) -> bool {
        self.outputs.iter().any(|o| o == output_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_submitted() {
        let task = Task::new(TaskKind::Backup, ExecutionClass::Async);
        assert_eq!(task.state, TaskState::Submitted);
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        assert!(!task.is_terminal());
    }

    #[test]
    fn test_complete_lifecycle() {
        let mut task = Task::new(TaskKind::Process, ExecutionClass::Sync);
        task.name = Some("gs:Download".to_string());
        task.start().unwrap();
        assert_eq!(task.state, TaskState::Running);
        assert!(task.started_at.is_some());

        let result = ResultRef::new(task.id, vec![OutputId::default()]);
        task.complete(Some(result.clone())).unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.result_ref, Some(result));
        assert!(task.completed_at.is_some());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_fail_records_error() {
        let mut task = Task::new(TaskKind::Restore, ExecutionClass::Async);
        task.start().unwrap();
        task.fail("backup info missing").unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error.as_deref(), Some("backup info missing"));
        assert!(task.result_ref.is_none());
    }

    #[test]
    fn test_stop_from_submitted() {
        let mut task = Task::new(TaskKind::Backup, ExecutionClass::Async);
        task.stop().unwrap();
        assert_eq!(task.state, TaskState::Stopped);
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_terminal_task_is_immutable() {
        let mut task = Task::new(TaskKind::Process, ExecutionClass::Async);
        task.start().unwrap();
        task.fail("boom").unwrap();
        let before = task.clone();

        assert!(task.complete(None).is_err());
        assert!(task.stop().is_err());
        assert!(task.start().is_err());
        assert_eq!(task, before);
    }

    #[test]
    fn test_is_stale() {
        let mut task = Task::new(TaskKind::Backup, ExecutionClass::Async);
        let now = Utc::now();
        assert!(!task.is_stale(now, Duration::ZERO));

        task.stop().unwrap();
        let later = task.completed_at.unwrap() + chrono::Duration::seconds(10);
        assert!(task.is_stale(later, Duration::from_secs(5)));
        assert!(!task.is_stale(later, Duration::from_secs(60)));
    }

    #[test]
    fn test_result_ref_contains() {
        let result = ResultRef::new(TaskId::generate(), vec![OutputId::new("result")]);
        assert!(result.contains(&OutputId::new("result")));
        assert!(!result.contains(&OutputId::new("log")));
    }
}
