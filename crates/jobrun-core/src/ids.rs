//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::CoreError;

/// Unique identifier for a Task.
///
/// Task ids are UUIDs. Identifiers arriving from outside the engine as
/// strings must parse as a UUID; anything else is an [`CoreError::InvalidTaskId`],
/// which callers keep distinct from a well-formed id that matches no task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a new random TaskId.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a TaskId from its string form.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::InvalidTaskId(s.to_string()))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Anything that can name a task: a typed [`TaskId`] or a raw string from a
/// request that still has to be validated.
pub trait AsTaskId {
    /// Resolve to a typed id, rejecting malformed strings.
    fn as_task_id(&self) -> Result<TaskId, CoreError>;
}

impl AsTaskId for TaskId {
    fn as_task_id(&self) -> Result<TaskId, CoreError> {
        Ok(*self)
    }
}

impl AsTaskId for str {
    fn as_task_id(&self) -> Result<TaskId, CoreError> {
        TaskId::parse(self)
    }
}

impl AsTaskId for String {
    fn as_task_id(&self) -> Result<TaskId, CoreError> {
        TaskId::parse(self)
    }
}

/// Identifier of one output produced by a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputId(String);

impl OutputId {
    /// Name of the output a process reports when it produces a single artifact.
    pub const RESULT: &'static str = "result";

    /// Create a new OutputId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OutputId {
    fn default() -> Self {
        Self::new(Self::RESULT)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OutputId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OutputId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of the external resource a job body works on (usually a directory).
///
/// The engine never looks inside the resource; it only compares keys to keep
/// backup and restore jobs on the same resource from overlapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Create a new ResourceKey from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Create a ResourceKey naming a filesystem path.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().to_string_lossy().into_owned())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ResourceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}
