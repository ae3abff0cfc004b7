//! JobRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - An async runtime
//! - Worker pools or scheduling
//! - Storage of produced artifacts
//!
//! All types here describe the long-running job domain: what a task is,
//! which states it moves through and how it is identified.

pub mod error;
pub mod ids;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{AsTaskId, OutputId, ResourceKey, TaskId};
pub use status::{ExecutionClass, TaskKind, TaskState};
pub use task::{ResultRef, Task};
