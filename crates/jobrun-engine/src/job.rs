//! Job body contract: what the engine runs, and what it hands the body.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use jobrun_core::{ExecutionClass, OutputId, ResourceKey, Task, TaskId, TaskKind};

use crate::error::JobError;

/// A pluggable unit of blocking work.
///
/// `run` executes on a blocking worker thread. It should call
/// [`JobContext::check_cancelled`] at natural breakpoints (between files,
/// between tiles) and return [`JobError::Cancelled`] when asked to stop.
/// The engine never kills the thread.
pub trait JobBody: Send + 'static {
    /// Execute the job to completion.
    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput, JobError>;

    /// Undo partial work after a cancellation, before the task is marked Stopped.
    fn on_cancelled(&mut self, _ctx: &JobContext) {}
}

impl<F> JobBody for F
where
    F: FnMut(&JobContext) -> Result<JobOutput, JobError> + Send + 'static,
{
    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput, JobError> {
        self(ctx)
    }
}

/// What a running job body can see of its task.
#[derive(Debug, Clone)]
pub struct JobContext {
    task_id: TaskId,
    kind: TaskKind,
    working_resource: Option<ResourceKey>,
    token: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(task: &Task, token: CancellationToken) -> Self {
        Self {
            task_id: task.id,
            kind: task.kind,
            working_resource: task.working_resource.clone(),
            token,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn working_resource(&self) -> Option<&ResourceKey> {
        self.working_resource.as_ref()
    }

    /// Returns true once a cancel has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `Err(JobError::Cancelled)` once a cancel has been requested.
    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.token.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Artifacts a job body produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    artifacts: Vec<(OutputId, PathBuf)>,
}

impl JobOutput {
    /// Output with no retrievable artifact.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Output with a single artifact under [`OutputId::RESULT`].
    pub fn single(location: impl Into<PathBuf>) -> Self {
        Self::empty().with_artifact(OutputId::default(), location)
    }

    /// Builder method to add an artifact.
    pub fn with_artifact(mut self, id: impl Into<OutputId>, location: impl Into<PathBuf>) -> Self {
        let id = id.into();
        let location = location.into();
        match self.artifacts.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = location,
            None => self.artifacts.push((id, location)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn artifacts(&self) -> &[(OutputId, PathBuf)] {
        &self.artifacts
    }

    pub(crate) fn into_artifacts(self) -> Vec<(OutputId, PathBuf)> {
        self.artifacts
    }
}

/// A submission: the body plus the metadata the engine tracks for it.
pub struct JobSpec {
    pub(crate) kind: TaskKind,
    pub(crate) execution_class: ExecutionClass,
    pub(crate) name: Option<String>,
    pub(crate) working_resource: Option<ResourceKey>,
    pub(crate) labels: HashMap<String, String>,
    pub(crate) body: Box<dyn JobBody>,
}

impl JobSpec {
    pub fn new(kind: TaskKind, execution_class: ExecutionClass, body: impl JobBody) -> Self {
        Self {
            kind,
            execution_class,
            name: None,
            working_resource: None,
            labels: HashMap::new(),
            body: Box::new(body),
        }
    }

    /// A backup of `resource`. Backups always run in the asynchronous class.
    pub fn backup(resource: impl Into<ResourceKey>, body: impl JobBody) -> Self {
        Self::new(TaskKind::Backup, ExecutionClass::Async, body).with_working_resource(resource)
    }

    /// A restore into `resource`. Restores always run in the asynchronous class.
    pub fn restore(resource: impl Into<ResourceKey>, body: impl JobBody) -> Self {
        Self::new(TaskKind::Restore, ExecutionClass::Async, body).with_working_resource(resource)
    }

    /// A named process execution in the caller's chosen class.
    pub fn process(
        name: impl Into<String>,
        execution_class: ExecutionClass,
        body: impl JobBody,
    ) -> Self {
        Self::new(TaskKind::Process, execution_class, body).with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_working_resource(mut self, resource: impl Into<ResourceKey>) -> Self {
        self.working_resource = Some(resource.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn execution_class(&self) -> ExecutionClass {
        self.execution_class
    }

    /// Split into the registry record and the body to execute.
    pub(crate) fn into_parts(self) -> (Task, Box<dyn JobBody>) {
        let mut task = Task::new(self.kind, self.execution_class);
        task.name = self.name;
        task.working_resource = self.working_resource;
        task.labels = self.labels;
        (task, self.body)
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("kind", &self.kind)
            .field("execution_class", &self.execution_class)
            .field("name", &self.name)
            .field("working_resource", &self.working_resource)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &JobContext) -> Result<JobOutput, JobError> {
        Ok(JobOutput::empty())
    }

    #[test]
    fn test_backup_and_restore_are_async() {
        let backup = JobSpec::backup("/data/ws", noop);
        assert_eq!(backup.kind(), TaskKind::Backup);
        assert_eq!(backup.execution_class(), ExecutionClass::Async);

        let restore = JobSpec::restore("/data/ws", noop);
        assert_eq!(restore.kind(), TaskKind::Restore);
        assert_eq!(restore.execution_class(), ExecutionClass::Async);
    }

    #[test]
    fn test_into_parts_carries_metadata() {
        let spec = JobSpec::process("gs:Clip", ExecutionClass::Sync, noop)
            .with_label("notify", "ops@example.org");
        let (task, _body) = spec.into_parts();

        assert_eq!(task.kind, TaskKind::Process);
        assert_eq!(task.execution_class, ExecutionClass::Sync);
        assert_eq!(task.name.as_deref(), Some("gs:Clip"));
        assert_eq!(task.labels.get("notify").map(String::as_str), Some("ops@example.org"));
        assert!(task.working_resource.is_none());
    }

    #[test]
    fn test_output_replaces_duplicate_ids() {
        let output = JobOutput::single("/tmp/a").with_artifact("result", "/tmp/b");
        assert_eq!(output.artifacts().len(), 1);
        assert_eq!(output.artifacts()[0].1, PathBuf::from("/tmp/b"));
        assert!(JobOutput::empty().is_empty());
    }

    #[test]
    fn test_context_reports_cancellation() {
        let task = Task::new(TaskKind::Backup, ExecutionClass::Async);
        let token = CancellationToken::new();
        let ctx = JobContext::new(&task, token.clone());

        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check_cancelled(), Err(JobError::Cancelled)));
    }
}
