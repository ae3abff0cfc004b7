//! Result store: artifacts of completed tasks, kept until they expire.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use jobrun_core::{OutputId, TaskId};

/// One stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEntry {
    pub task_id: TaskId,
    pub output_id: OutputId,
    pub location: PathBuf,
    pub expires_at: DateTime<Utc>,
}

impl ResultEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Outcome of a result lookup.
#[derive(Debug)]
pub(crate) enum Lookup {
    Found(PathBuf),
    Missing,
    /// The entry had expired and was dropped; its artifact still needs freeing.
    Expired(ResultEntry),
}

#[derive(Default)]
pub(crate) struct ResultStore {
    entries: RwLock<HashMap<(TaskId, OutputId), ResultEntry>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, entry: ResultEntry) {
        let key = (entry.task_id, entry.output_id.clone());
        self.entries.write().insert(key, entry);
    }

    /// Look up an entry, dropping it on the spot if it has expired.
    pub fn get(&self, task_id: TaskId, output_id: &OutputId, now: DateTime<Utc>) -> Lookup {
        let key = (task_id, output_id.clone());
        {
            let entries = self.entries.read();
            match entries.get(&key) {
                None => return Lookup::Missing,
                Some(entry) if !entry.is_expired(now) => {
                    return Lookup::Found(entry.location.clone())
                }
                Some(_) => {}
            }
        }

        // Re-check under the write lock; another caller may have swept it.
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(&key) {
            if !entry.is_expired(now) {
                return Lookup::Found(entry.location.clone());
            }
        }
        entries
            .remove(&key)
            .map_or(Lookup::Missing, Lookup::Expired)
    }

    /// Remove and return every entry that expired before `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<ResultEntry> {
        let mut entries = self.entries.write();
        let expired: Vec<(TaskId, OutputId)> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect()
    }

    /// Remove every entry of a task. Safe to race with `sweep`.
    pub fn remove_task(&self, task_id: TaskId) -> Vec<ResultEntry> {
        let mut entries = self.entries.write();
        let keys: Vec<(TaskId, OutputId)> = entries
            .keys()
            .filter(|(id, _)| *id == task_id)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect()
    }

    /// Returns true while the task has any entry left.
    pub fn holds(&self, task_id: TaskId) -> bool {
        self.entries.read().keys().any(|(id, _)| *id == task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}
