//! Admission scheduler: decides when a submitted task may start.
//!
//! Each execution class has a pool with a FIFO wait queue and a running
//! counter checked against the class quota. Backup and restore tasks that
//! name a working resource first pass through a per-resource lane that lets
//! one task hold the resource at a time; only the lane holder sits on its
//! class queue. Process tasks go straight to the class queue.
//!
//! The scheduler only moves ids around. The engine owns the tasks, holds the
//! scheduler lock while it applies the decisions, and supplies the quotas on
//! every call so configuration changes take effect immediately.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use jobrun_core::{ExecutionClass, ResourceKey, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Waiting for the working resource.
    Lane,
    /// On the class queue.
    Queued,
    /// Holding a class slot.
    Running,
}

#[derive(Debug)]
struct Placement {
    class: ExecutionClass,
    resource: Option<ResourceKey>,
    stage: Stage,
}

#[derive(Debug, Default)]
struct Pool {
    running: usize,
    queue: VecDeque<TaskId>,
}

#[derive(Debug, Default)]
struct Lane {
    holder: Option<TaskId>,
    waiting: VecDeque<TaskId>,
}

/// Occupancy of one execution class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub running: usize,
    pub queued: usize,
}

#[derive(Debug, Default)]
pub(crate) struct AdmissionScheduler {
    sync: Pool,
    async_: Pool,
    lanes: HashMap<ResourceKey, Lane>,
    placements: HashMap<TaskId, Placement>,
}

impl AdmissionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool_mut(&mut self, class: ExecutionClass) -> &mut Pool {
        match class {
            ExecutionClass::Sync => &mut self.sync,
            ExecutionClass::Async => &mut self.async_,
        }
    }

    fn pool(&self, class: ExecutionClass) -> &Pool {
        match class {
            ExecutionClass::Sync => &self.sync,
            ExecutionClass::Async => &self.async_,
        }
    }

    /// Register a submitted task. `resource` is set only for tasks that must
    /// be serialized on it.
    pub fn enqueue(&mut self, id: TaskId, class: ExecutionClass, resource: Option<ResourceKey>) {
        let stage = match &resource {
            Some(key) => {
                let lane = self.lanes.entry(key.clone()).or_default();
                if lane.holder.is_none() {
                    lane.holder = Some(id);
                    Stage::Queued
                } else {
                    lane.waiting.push_back(id);
                    debug!(task_id = %id, resource = %key, "Waiting for working resource");
                    Stage::Lane
                }
            }
            None => Stage::Queued,
        };
        if stage == Stage::Queued {
            self.pool_mut(class).queue.push_back(id);
        }
        self.placements.insert(
            id,
            Placement {
                class,
                resource,
                stage,
            },
        );
    }

    /// Pop every queued task that fits under its class quota, in FIFO order.
    pub fn take_ready(&mut self, capacity: impl Fn(ExecutionClass) -> usize) -> Vec<TaskId> {
        let mut ready = Vec::new();
        for class in ExecutionClass::all() {
            let limit = capacity(*class);
            let pool = self.pool_mut(*class);
            let mut taken = Vec::new();
            while pool.running < limit {
                let Some(id) = pool.queue.pop_front() else {
                    break;
                };
                pool.running += 1;
                taken.push(id);
            }
            for id in &taken {
                if let Some(placement) = self.placements.get_mut(id) {
                    placement.stage = Stage::Running;
                }
            }
            ready.extend(taken);
        }
        ready
    }

    /// Forget a task that reached a terminal state after holding a slot,
    /// freeing the slot and its working resource.
    pub fn release(&mut self, id: &TaskId) -> bool {
        let Some(placement) = self.placements.remove(id) else {
            return false;
        };
        match placement.stage {
            Stage::Running => {
                let pool = self.pool_mut(placement.class);
                pool.running = pool.running.saturating_sub(1);
            }
            Stage::Queued => self.pool_mut(placement.class).queue.retain(|q| q != id),
            Stage::Lane => {}
        }
        if let Some(key) = placement.resource {
            self.leave_lane(id, &key);
        }
        true
    }

    /// Take a task that has not started yet off its queue or lane.
    ///
    /// Returns false if the task already holds a slot or is unknown, in which
    /// case nothing changes.
    pub fn withdraw(&mut self, id: &TaskId) -> bool {
        match self.placements.get(id) {
            Some(p) if p.stage != Stage::Running => self.release(id),
            _ => false,
        }
    }

    /// Ids of every task that has not started yet.
    pub fn waiting(&self) -> Vec<TaskId> {
        self.placements
            .iter()
            .filter(|(_, p)| p.stage != Stage::Running)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn snapshot(&self, class: ExecutionClass) -> PoolSnapshot {
        let queued = self
            .placements
            .values()
            .filter(|p| p.class == class && p.stage != Stage::Running)
            .count();
        PoolSnapshot {
            running: self.pool(class).running,
            queued,
        }
    }

    fn leave_lane(&mut self, id: &TaskId, key: &ResourceKey) {
        let Some(lane) = self.lanes.get_mut(key) else {
            return;
        };
        if lane.holder.as_ref() != Some(id) {
            lane.waiting.retain(|w| w != id);
            return;
        }
        lane.holder = lane.waiting.pop_front();
        let Some(next) = lane.holder else {
            self.lanes.remove(key);
            return;
        };
        if let Some(placement) = self.placements.get_mut(&next) {
            placement.stage = Stage::Queued;
            let class = placement.class;
            debug!(task_id = %next, resource = %key, "Working resource handed over");
            self.pool_mut(class).queue.push_back(next);
        }
    }
}
