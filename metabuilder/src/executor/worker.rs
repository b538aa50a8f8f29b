//! Worker records and lease bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::QueueClass;

/// Liveness and availability of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Ready for a task.
    Idle,
    /// Holding a task.
    Busy,
    /// Finishing its current task, accepting nothing new.
    Draining,
    /// Lease expired; presumed crashed.
    Dead,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Draining => write!(f, "draining"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// A registered worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    /// Worker id.
    pub id: String,
    /// The class this worker serves.
    pub queue_class: QueueClass,
    /// Current status.
    pub status: WorkerStatus,
    /// Task being executed.
    pub current_task: Option<Uuid>,
    /// Last heartbeat.
    pub last_heartbeat: DateTime<Utc>,
    /// Lease expiry, when a lease is held.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Tasks finished by this worker.
    pub tasks_processed: u64,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    pub(crate) fn new(id: impl Into<String>, queue_class: QueueClass, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            queue_class,
            status: WorkerStatus::Idle,
            current_task: None,
            last_heartbeat: now,
            lease_expires_at: None,
            tasks_processed: 0,
            registered_at: now,
        }
    }

    /// Returns true if the worker can take a task.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == WorkerStatus::Idle && self.current_task.is_none()
    }

    /// Returns true if a lease is held and has passed its expiry.
    #[must_use]
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.is_some_and(|expires| now >= expires)
    }
}
