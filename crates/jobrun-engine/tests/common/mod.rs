//! Shared job bodies and polling helpers for engine integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobrun_engine::{
    EngineConfig, JobBody, JobContext, JobEngine, JobError, JobOutput, Task, TaskId, TaskState,
};

/// Config with explicit quotas and a reaper that stays out of the way.
pub fn config(max_sync: usize, max_async: usize) -> EngineConfig {
    EngineConfig {
        max_synchronous_processes: max_sync,
        max_asynchronous_processes: max_async,
        sweep_interval: Some(Duration::from_secs(60)),
        ..EngineConfig::default()
    }
}

/// A latch job bodies spin on until the test opens it.
#[derive(Clone, Default)]
pub struct Gate(Arc<AtomicBool>);

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Observations a job body records for the test.
#[derive(Clone, Default)]
pub struct Probe {
    pub ran: Arc<AtomicBool>,
    pub cleaned: Arc<AtomicBool>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ran(&self) -> bool {
        self.ran.load(Ordering::SeqCst)
    }

    pub fn cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }
}

/// Blocks until its gate opens, checking for cancellation while it waits.
pub struct GatedJob {
    gate: Gate,
    probe: Probe,
    output: Option<PathBuf>,
}

impl GatedJob {
    pub fn new(gate: &Gate) -> Self {
        Self {
            gate: gate.clone(),
            probe: Probe::new(),
            output: None,
        }
    }

    pub fn with_probe(mut self, probe: &Probe) -> Self {
        self.probe = probe.clone();
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

impl JobBody for GatedJob {
    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput, JobError> {
        self.probe.ran.store(true, Ordering::SeqCst);
        while !self.gate.is_open() {
            ctx.check_cancelled()?;
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(match &self.output {
            Some(path) => JobOutput::single(path.clone()),
            None => JobOutput::empty(),
        })
    }

    fn on_cancelled(&mut self, _ctx: &JobContext) {
        self.probe.cleaned.store(true, Ordering::SeqCst);
    }
}

/// Job that finishes right away, optionally producing one artifact.
pub fn instant(output: Option<PathBuf>) -> impl JobBody {
    move |_ctx: &JobContext| -> Result<JobOutput, JobError> {
        Ok(match &output {
            Some(path) => JobOutput::single(path.clone()),
            None => JobOutput::empty(),
        })
    }
}

/// Tracks how many job bodies run at once and in which order they started.
#[derive(Clone, Default)]
pub struct Occupancy {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    order: Arc<Mutex<Vec<usize>>>,
}

impl Occupancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn order(&self) -> Vec<usize> {
        self.order.lock().unwrap().clone()
    }

    /// Job that records its start, holds a slot for `hold`, then completes.
    pub fn job(&self, label: usize, hold: Duration) -> impl JobBody {
        let occupancy = self.clone();
        move |_ctx: &JobContext| -> Result<JobOutput, JobError> {
            occupancy.order.lock().unwrap().push(label);
            let now = occupancy.active.fetch_add(1, Ordering::SeqCst) + 1;
            occupancy.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(hold);
            occupancy.active.fetch_sub(1, Ordering::SeqCst);
            Ok(JobOutput::empty())
        }
    }
}

/// Poll a task until `done` holds, failing the test after five seconds.
pub async fn wait_until(engine: &JobEngine, id: TaskId, done: impl Fn(&Task) -> bool) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = engine.status(&id).expect("task should exist");
        if done(&task) {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} stuck in {}",
            task.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(engine: &JobEngine, id: TaskId, state: TaskState) -> Task {
    wait_until(engine, id, |t| t.state == state).await
}

pub async fn wait_for_terminal(engine: &JobEngine, id: TaskId) -> Task {
    wait_until(engine, id, |t| t.is_terminal()).await
}

/// Poll an arbitrary condition, failing the test after five seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
