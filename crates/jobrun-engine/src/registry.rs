//! Task registry: every known task, keyed by id.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use jobrun_core::{Task, TaskId, TaskKind, TaskState};

use crate::job::JobBody;

/// Registry-side state of one task.
pub(crate) struct TaskEntry {
    /// Submission sequence number; orders listings.
    pub seq: u64,

    pub task: Task,

    /// Present until the task is dispatched or stopped while queued.
    /// Only accessed through `get_mut` under the registry write lock.
    pub body: Mutex<Option<Box<dyn JobBody>>>,

    pub cancel: CancellationToken,

    /// Signalled when a bounded submitter's task is granted a slot.
    pub admitted: Option<oneshot::Sender<()>>,

    /// Drop the entry as soon as the task reaches a terminal state.
    pub remove_on_finish: bool,
}

/// Filter applied to task listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub kind: Option<TaskKind>,
    pub state: Option<TaskState>,
    /// Only tasks that are still Submitted or Running.
    pub active_only: bool,
}

impl TaskFilter {
    pub fn kind(kind: TaskKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn state(state: TaskState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if self.kind.is_some_and(|kind| kind != task.kind) {
            return false;
        }
        if self.state.is_some_and(|state| state != task.state) {
            return false;
        }
        !(self.active_only && task.is_terminal())
    }
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    tasks: HashMap<TaskId, TaskEntry>,
}

/// Thread-safe map of tasks. Readers only ever receive snapshots.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    inner: RwLock<Inner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly submitted task.
    pub fn insert(
        &self,
        task: Task,
        body: Box<dyn JobBody>,
        admitted: Option<oneshot::Sender<()>>,
    ) -> TaskId {
        let id = task.id;
        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.insert(
            id,
            TaskEntry {
                seq,
                task,
                body: Mutex::new(Some(body)),
                cancel: CancellationToken::new(),
                admitted,
                remove_on_finish: false,
            },
        );
        id
    }

    /// Snapshot of one task.
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.inner.read().tasks.get(id).map(|e| e.task.clone())
    }

    pub fn state(&self, id: &TaskId) -> Option<TaskState> {
        self.inner.read().tasks.get(id).map(|e| e.task.state)
    }

    /// Run `f` against the entry under the write lock.
    pub fn update<R>(&self, id: &TaskId, f: impl FnOnce(&mut TaskEntry) -> R) -> Option<R> {
        self.inner.write().tasks.get_mut(id).map(f)
    }

    pub fn remove(&self, id: &TaskId) -> Option<Task> {
        self.inner.write().tasks.remove(id).map(|e| e.task)
    }

    /// All tasks in submission order.
    pub fn list_all(&self) -> Vec<Task> {
        self.list_filtered(&TaskFilter::default())
    }

    pub fn list_filtered(&self, filter: &TaskFilter) -> Vec<Task> {
        let inner = self.inner.read();
        let mut entries: Vec<&TaskEntry> = inner
            .tasks
            .values()
            .filter(|e| filter.matches(&e.task))
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.task.clone()).collect()
    }

    /// All tasks partitioned by kind, each group in submission order.
    pub fn list_grouped(&self) -> BTreeMap<TaskKind, Vec<Task>> {
        let mut grouped: BTreeMap<TaskKind, Vec<Task>> = BTreeMap::new();
        for task in self.list_all() {
            grouped.entry(task.kind).or_default().push(task);
        }
        grouped
    }

    /// Cancellation tokens of every running task.
    pub fn running_tokens(&self) -> Vec<(TaskId, CancellationToken)> {
        self.inner
            .read()
            .tasks
            .iter()
            .filter(|(_, e)| e.task.state == TaskState::Running)
            .map(|(id, e)| (*id, e.cancel.clone()))
            .collect()
    }

    /// Remove terminal tasks that finished more than `retention` ago,
    /// skipping any task for which `keep` returns true.
    pub fn evict_stale(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
        keep: impl Fn(&TaskId) -> bool,
    ) -> Vec<TaskId> {
        let mut inner = self.inner.write();
        let stale: Vec<TaskId> = inner
            .tasks
            .iter()
            .filter(|(id, e)| e.task.is_stale(now, retention) && !keep(id))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            inner.tasks.remove(id);
        }
        stale
    }

    /// Count tasks per state and per kind in one pass.
    pub fn counts(&self) -> (HashMap<TaskState, u64>, HashMap<TaskKind, u64>) {
        let inner = self.inner.read();
        let mut by_state = HashMap::new();
        let mut by_kind = HashMap::new();
        for entry in inner.tasks.values() {
            *by_state.entry(entry.task.state).or_insert(0) += 1;
            *by_kind.entry(entry.task.kind).or_insert(0) += 1;
        }
        (by_state, by_kind)
    }
}
