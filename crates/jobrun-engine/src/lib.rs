//! JobRun Engine Library
//!
//! This crate runs long-lived, blocking jobs (backups, restores, process
//! executions) on bounded worker pools. A caller submits a job, gets a task
//! id back immediately, polls the task's state, may cancel it, and fetches
//! its stored results until they expire.
//!
//! ```no_run
//! use jobrun_engine::{EngineConfig, JobContext, JobEngine, JobError, JobOutput, JobSpec};
//!
//! # async fn demo() -> Result<(), jobrun_engine::EngineError> {
//! let engine = JobEngine::start(EngineConfig::default())?;
//! let copy = |ctx: &JobContext| -> Result<JobOutput, JobError> {
//!     ctx.check_cancelled()?;
//!     Ok(JobOutput::empty())
//! };
//! let id = engine.submit(JobSpec::backup("/srv/data/workspace", copy));
//! let task = engine.status(&id)?;
//! println!("{} is {}", task.id, task.state);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod job;
mod metrics;
mod reaper;
mod registry;
mod results;
mod scheduler;
mod worker;

pub use config::EngineConfig;
pub use engine::{JobEngine, SweepReport};
pub use error::{EngineError, JobError};
pub use job::{JobBody, JobContext, JobOutput, JobSpec};
pub use registry::TaskFilter;
pub use scheduler::PoolSnapshot;

pub use jobrun_core::{
    AsTaskId, CoreError, ExecutionClass, OutputId, ResourceKey, ResultRef, Task, TaskId, TaskKind,
    TaskState,
};
