//! The job engine facade.
//!
//! All task bookkeeping is ordered by the scheduler mutex: submission,
//! dispatch, cancellation and completion each take it first, then the
//! registry, then the result store. Readers (`status`, listings, result
//! fetches) skip the scheduler and only ever see whole snapshots.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use jobrun_core::{
    AsTaskId, CoreError, ExecutionClass, OutputId, ResultRef, Task, TaskId, TaskKind, TaskState,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::job::{JobContext, JobSpec};
use crate::metrics::{self, MetricsSnapshot};
use crate::reaper;
use crate::registry::{TaskFilter, TaskRegistry};
use crate::results::{Lookup, ResultEntry, ResultStore};
use crate::scheduler::{AdmissionScheduler, PoolSnapshot};
use crate::worker::{self, Outcome};

struct EngineInner {
    config: RwLock<EngineConfig>,
    registry: TaskRegistry,
    scheduler: Mutex<AdmissionScheduler>,
    results: ResultStore,
    runtime: Handle,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

/// Handle to a running job engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

/// Non-owning engine handle held by background tasks.
pub(crate) struct WeakEngine(Weak<EngineInner>);

impl WeakEngine {
    pub fn upgrade(&self) -> Option<JobEngine> {
        self.0.upgrade().map(|inner| JobEngine { inner })
    }
}

/// What one reaper pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Result entries past their expiration.
    pub expired_results: usize,
    /// Terminal tasks past the retention period.
    pub evicted_tasks: usize,
}

impl JobEngine {
    /// Start an engine on the current tokio runtime and spawn its reaper.
    pub fn start(config: EngineConfig) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        info!(
            max_sync = config.capacity(ExecutionClass::Sync),
            max_async = config.capacity(ExecutionClass::Async),
            expiration_secs = config.resource_expiration().as_secs(),
            "Starting job engine"
        );

        let engine = Self {
            inner: Arc::new(EngineInner {
                config: RwLock::new(config),
                registry: TaskRegistry::new(),
                scheduler: Mutex::new(AdmissionScheduler::new()),
                results: ResultStore::new(),
                runtime,
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        };
        reaper::spawn(&engine);
        Ok(engine)
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine(Arc::downgrade(&self.inner))
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Accept a job and return its id. Never blocks and never fails for load;
    /// the task runs as soon as its class has a free slot.
    pub fn submit(&self, spec: JobSpec) -> TaskId {
        self.submit_inner(spec, None)
    }

    /// Submit a synchronous-class job and wait up to the connection timeout
    /// for it to be granted a worker slot.
    ///
    /// On timeout the task is taken off its queue, marked Stopped, and
    /// [`EngineError::Capacity`] is returned. Asynchronous-class jobs are
    /// never rejected and return immediately, as with [`JobEngine::submit`].
    pub async fn submit_bounded(&self, spec: JobSpec) -> Result<TaskId, EngineError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        if spec.execution_class() != ExecutionClass::Sync {
            return Ok(self.submit(spec));
        }

        let (tx, rx) = oneshot::channel();
        let id = self.submit_inner(spec, Some(tx));
        let waited = self.inner.config.read().connection_timeout;

        // A dropped sender means the task was stopped while queued; the
        // caller learns that by polling.
        if tokio::time::timeout(waited, rx).await.is_ok() {
            return Ok(id);
        }

        let mut sched = self.inner.scheduler.lock();
        if !self.stop_queued(&mut sched, id) {
            // Admitted between the timeout firing and taking the lock.
            return Ok(id);
        }
        warn!(
            task_id = %id,
            waited_ms = waited.as_millis() as u64,
            "No synchronous worker slot within the connection timeout"
        );
        self.pump(&mut sched);
        Err(EngineError::Capacity { task_id: id, waited })
    }

    fn submit_inner(&self, spec: JobSpec, admitted: Option<oneshot::Sender<()>>) -> TaskId {
        let (task, body) = spec.into_parts();
        let id = task.id;
        let kind = task.kind;
        let class = task.execution_class;
        let lane = if kind.serializes_on_resource() {
            task.working_resource.clone()
        } else {
            None
        };

        let mut sched = self.inner.scheduler.lock();
        self.inner.registry.insert(task, body, admitted);
        info!(task_id = %id, kind = %kind, class = %class, "Task submitted");

        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.registry.update(&id, |entry| {
                *entry.body.get_mut() = None;
                entry.admitted = None;
                entry.task.stop()
            });
            warn!(task_id = %id, "Engine is shut down; task stopped without running");
            return id;
        }

        sched.enqueue(id, class, lane);
        self.pump(&mut sched);
        id
    }

    /// Dispatch everything the current quotas allow.
    fn pump(&self, sched: &mut AdmissionScheduler) {
        let config = self.inner.config.read().clone();
        for id in sched.take_ready(|class| config.capacity(class)) {
            self.dispatch(sched, id);
        }
    }

    fn dispatch(&self, sched: &mut AdmissionScheduler, id: TaskId) {
        let started = self.inner.registry.update(&id, |entry| {
            let body = entry.body.get_mut().take()?;
            if let Err(err) = entry.task.start() {
                warn!(task_id = %id, error = %err, "Refusing to dispatch task");
                return None;
            }
            if let Some(tx) = entry.admitted.take() {
                let _ = tx.send(());
            }
            Some((body, JobContext::new(&entry.task, entry.cancel.clone())))
        });
        let Some((body, ctx)) = started.flatten() else {
            sched.release(&id);
            return;
        };

        info!(task_id = %id, kind = %ctx.kind(), "Task dispatched");

        let engine = self.clone();
        self.inner.runtime.spawn(async move {
            let outcome = match tokio::task::spawn_blocking(move || worker::execute(body, ctx)).await
            {
                Ok(outcome) => outcome,
                Err(err) => Outcome::Failed(format!("worker thread failed: {err}")),
            };
            engine.finish(id, outcome);
        });
    }

    /// Commit a job body's outcome and hand its slot to the next task.
    fn finish(&self, id: TaskId, outcome: Outcome) {
        let mut sched = self.inner.scheduler.lock();
        let expiration = self.inner.config.read().resource_expiration();
        let label = outcome.label();

        let committed = self.inner.registry.update(&id, |entry| {
            match outcome {
                Outcome::Completed(output) => {
                    let artifacts = output.into_artifacts();
                    let result_ref = (!artifacts.is_empty()).then(|| {
                        ResultRef::new(id, artifacts.iter().map(|(o, _)| o.clone()).collect())
                    });
                    entry.task.complete(result_ref)?;
                    let completed_at = entry.task.completed_at.unwrap_or_else(Utc::now);
                    let expires_at = expiry(completed_at, expiration);
                    for (output_id, location) in artifacts {
                        self.inner.results.put(ResultEntry {
                            task_id: id,
                            output_id,
                            location,
                            expires_at,
                        });
                    }
                    info!(task_id = %id, kind = %entry.task.kind, "Task completed");
                }
                Outcome::Failed(error) => {
                    warn!(task_id = %id, kind = %entry.task.kind, error = %error, "Task failed");
                    entry.task.fail(error)?;
                }
                Outcome::Stopped => {
                    entry.task.stop()?;
                    info!(task_id = %id, kind = %entry.task.kind, "Task stopped");
                }
            }
            Ok::<bool, CoreError>(entry.remove_on_finish)
        });

        match committed {
            Some(Ok(true)) => self.remove_task(id),
            Some(Ok(false)) => {}
            Some(Err(err)) => {
                warn!(task_id = %id, outcome = label, error = %err, "Discarding task outcome")
            }
            None => debug!(task_id = %id, outcome = label, "Finished task no longer registered"),
        }

        sched.release(&id);
        self.pump(&mut sched);
    }

    /// Withdraw a not-yet-started task and mark it Stopped.
    fn stop_queued(&self, sched: &mut AdmissionScheduler, id: TaskId) -> bool {
        if !sched.withdraw(&id) {
            return false;
        }
        let stopped = self.inner.registry.update(&id, |entry| {
            *entry.body.get_mut() = None;
            entry.admitted = None;
            entry.cancel.cancel();
            entry.task.stop()
        });
        match stopped {
            Some(Ok(())) => info!(task_id = %id, "Queued task stopped"),
            Some(Err(err)) => warn!(task_id = %id, error = %err, "Could not stop queued task"),
            None => {}
        }
        true
    }

    /// Drop a task and its results from the engine.
    fn remove_task(&self, id: TaskId) {
        self.inner.registry.remove(&id);
        let entries = self.inner.results.remove_task(id);
        debug!(task_id = %id, results = entries.len(), "Task removed");
        self.discard_artifacts(entries);
    }

    fn discard_artifacts(&self, entries: Vec<ResultEntry>) {
        if entries.is_empty() || !self.inner.config.read().purge_artifacts {
            return;
        }
        let locations = entries.into_iter().map(|e| e.location).collect();
        self.inner.runtime.spawn(reaper::purge_artifacts(locations));
    }

    /// Current snapshot of a task.
    pub fn status<I: AsTaskId + ?Sized>(&self, id: &I) -> Result<Task, EngineError> {
        let id = id.as_task_id()?;
        self.inner
            .registry
            .get(&id)
            .ok_or(EngineError::NotFound(id))
    }

    /// Every known task, in submission order.
    pub fn list_tasks(&self) -> Vec<Task> {
        self.inner.registry.list_all()
    }

    /// Every known task, grouped by kind.
    pub fn list_grouped(&self) -> BTreeMap<TaskKind, Vec<Task>> {
        self.inner.registry.list_grouped()
    }

    pub fn list_filtered(&self, filter: &TaskFilter) -> Vec<Task> {
        self.inner.registry.list_filtered(filter)
    }

    /// Request cancellation of a task.
    ///
    /// A queued task is stopped on the spot. A running task is asked to stop
    /// through its cancellation token and stays Running until its job body
    /// unwinds. Cancelling a finished task succeeds and changes nothing.
    pub fn cancel<I: AsTaskId + ?Sized>(&self, id: &I) -> Result<(), EngineError> {
        let id = id.as_task_id()?;
        let mut sched = self.inner.scheduler.lock();
        let state = self
            .inner
            .registry
            .state(&id)
            .ok_or(EngineError::NotFound(id))?;

        match state {
            TaskState::Submitted => {
                self.stop_queued(&mut sched, id);
                self.pump(&mut sched);
            }
            TaskState::Running => {
                self.inner.registry.update(&id, |entry| entry.cancel.cancel());
                info!(task_id = %id, "Cancellation requested");
            }
            _ => debug!(task_id = %id, state = %state, "Task already finished"),
        }
        Ok(())
    }

    /// Delete a task: cancel it if active and drop it and its results.
    ///
    /// A running task is removed once its job body unwinds.
    pub fn delete<I: AsTaskId + ?Sized>(&self, id: &I) -> Result<(), EngineError> {
        let id = id.as_task_id()?;
        let mut sched = self.inner.scheduler.lock();
        let state = self
            .inner
            .registry
            .state(&id)
            .ok_or(EngineError::NotFound(id))?;

        match state {
            TaskState::Submitted => {
                self.stop_queued(&mut sched, id);
                self.remove_task(id);
                self.pump(&mut sched);
            }
            TaskState::Running => {
                self.inner.registry.update(&id, |entry| {
                    entry.remove_on_finish = true;
                    entry.cancel.cancel();
                });
                info!(task_id = %id, "Task will be removed once it stops");
            }
            _ => self.remove_task(id),
        }
        Ok(())
    }

    /// Location of a stored result.
    pub fn fetch_result<I: AsTaskId + ?Sized>(
        &self,
        id: &I,
        output_id: &OutputId,
    ) -> Result<PathBuf, EngineError> {
        let task_id = id.as_task_id()?;
        let not_found = || EngineError::ResultNotFound {
            task_id,
            output_id: output_id.clone(),
        };

        match self.inner.results.get(task_id, output_id, Utc::now()) {
            Lookup::Found(location) => Ok(location),
            Lookup::Missing => Err(not_found()),
            Lookup::Expired(entry) => {
                debug!(task_id = %task_id, output = %output_id, "Result expired on fetch");
                self.discard_artifacts(vec![entry]);
                Err(not_found())
            }
        }
    }

    /// Change the configuration at runtime. Raised quotas take effect at once.
    pub fn update_config(&self, f: impl FnOnce(&mut EngineConfig)) {
        {
            let mut config = self.inner.config.write();
            f(&mut config);
            info!(
                max_sync = config.capacity(ExecutionClass::Sync),
                max_async = config.capacity(ExecutionClass::Async),
                expiration_secs = config.resource_expiration().as_secs(),
                "Engine configuration updated"
            );
        }
        let mut sched = self.inner.scheduler.lock();
        self.pump(&mut sched);
    }

    pub fn config(&self) -> EngineConfig {
        self.inner.config.read().clone()
    }

    /// Running and queued counts for one execution class.
    pub fn pool_snapshot(&self, class: ExecutionClass) -> PoolSnapshot {
        self.inner.scheduler.lock().snapshot(class)
    }

    /// Prometheus text exposition of the engine state.
    pub fn metrics(&self) -> String {
        let config = self.config();
        let pools = {
            let sched = self.inner.scheduler.lock();
            ExecutionClass::all()
                .iter()
                .map(|class| (*class, sched.snapshot(*class), config.capacity(*class)))
                .collect()
        };
        let (tasks_by_state, tasks_by_kind) = self.inner.registry.counts();

        metrics::collect_metrics(&MetricsSnapshot {
            tasks_by_state,
            tasks_by_kind,
            pools,
            results_stored: self.inner.results.len(),
        })
    }

    /// Run one reaper pass: drop expired results and tasks past retention,
    /// then delete their artifacts.
    pub async fn sweep_now(&self) -> SweepReport {
        let now = Utc::now();
        let (retention, purge) = {
            let config = self.inner.config.read();
            (config.task_retention, config.purge_artifacts)
        };

        let mut evicted = self.inner.results.sweep(now);
        let expired_results = evicted.len();
        // Tasks outlive retention while any of their results is unexpired.
        let results = &self.inner.results;
        let stale = self
            .inner
            .registry
            .evict_stale(now, retention, |id| results.holds(*id));
        for id in &stale {
            evicted.extend(self.inner.results.remove_task(*id));
        }

        if expired_results > 0 || !stale.is_empty() {
            info!(
                expired_results,
                evicted_tasks = stale.len(),
                "Reaper pass removed entries"
            );
        }
        if purge {
            reaper::purge_artifacts(evicted.into_iter().map(|e| e.location).collect()).await;
        }

        SweepReport {
            expired_results,
            evicted_tasks: stale.len(),
        }
    }

    /// Stop the reaper, stop every queued task and ask running ones to stop.
    /// Tasks submitted afterwards are stopped without running.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();

        let mut sched = self.inner.scheduler.lock();
        let mut stopped = 0;
        for id in sched.waiting() {
            if self.stop_queued(&mut sched, id) {
                stopped += 1;
            }
        }
        let running = self.inner.registry.running_tokens();
        for (_, token) in &running {
            token.cancel();
        }
        info!(stopped, cancelled = running.len(), "Job engine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

fn expiry(completed_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| completed_at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_requires_runtime() {
        let result = JobEngine::start(EngineConfig::default());
        assert!(matches!(result, Err(EngineError::NoRuntime)));
    }

    #[test]
    fn test_expiry_saturates() {
        let now = Utc::now();
        assert_eq!(expiry(now, Duration::from_secs(60)), now + chrono::Duration::seconds(60));
        assert_eq!(expiry(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn test_status_distinguishes_invalid_and_missing() {
        let engine = JobEngine::start(EngineConfig::default()).unwrap();

        let err = engine.status("12345").unwrap_err();
        assert!(matches!(err, EngineError::InvalidId(ref id) if id == "12345"));

        let missing = TaskId::generate();
        let err = engine.status(&missing).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_stopped() {
        let engine = JobEngine::start(EngineConfig::default()).unwrap();
        engine.shutdown();
        assert!(engine.is_shut_down());

        let id = engine.submit(JobSpec::process(
            "gs:Buffer",
            ExecutionClass::Async,
            |_ctx: &JobContext| -> Result<crate::JobOutput, crate::JobError> {
                Ok(crate::JobOutput::empty())
            },
        ));
        assert_eq!(engine.status(&id).unwrap().state, TaskState::Stopped);

        let bounded = engine
            .submit_bounded(JobSpec::process(
                "gs:Buffer",
                ExecutionClass::Sync,
                |_ctx: &JobContext| -> Result<crate::JobOutput, crate::JobError> {
                    Ok(crate::JobOutput::empty())
                },
            ))
            .await;
        assert!(matches!(bounded, Err(EngineError::ShuttingDown)));
    }
}
