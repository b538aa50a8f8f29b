//! Read-only pool snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::QueueClass;

/// Per-class queue figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassQueueStats {
    /// Tasks waiting.
    pub pending: usize,
    /// Tasks executing.
    pub running: usize,
    /// Live workers serving the class.
    pub workers: usize,
    /// Idle workers serving the class.
    pub available_workers: usize,
    /// Configured worker capacity.
    pub capacity: usize,
}

/// Snapshot of the task queues.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Figures per class.
    pub classes: HashMap<QueueClass, ClassQueueStats>,
    /// Tasks waiting across classes.
    pub total_pending: usize,
    /// Tasks executing across classes.
    pub total_running: usize,
    /// Tasks completed since start.
    pub completed: u64,
    /// Tasks failed since start.
    pub failed: u64,
    /// Tasks returned to pending after a worker loss.
    pub requeued: u64,
}

impl QueueStats {
    /// Figures for one class.
    #[must_use]
    pub fn class(&self, queue_class: QueueClass) -> ClassQueueStats {
        self.classes.get(&queue_class).copied().unwrap_or_default()
    }
}

/// Snapshot of the workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Registered workers.
    pub total: usize,
    /// Idle workers.
    pub idle: usize,
    /// Busy workers.
    pub busy: usize,
    /// Draining workers.
    pub draining: usize,
    /// Dead workers not yet evicted.
    pub dead: usize,
    /// Workers that can take a task now.
    pub available: usize,
    /// Busy share of live workers, in `[0, 1]`.
    pub utilization_rate: f64,
    /// Tasks processed by current workers.
    pub tasks_processed: u64,
    /// Configured global capacity.
    pub max_workers: usize,
}
