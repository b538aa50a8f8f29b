//! Orchestration event emission.
//!
//! Runs and the worker runtime report lifecycle facts through an
//! [`EventSink`]. Sinks must never fail the caller.

mod sink;

pub use sink::{CollectingEventSink, Event, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod types {
    /// A run was accepted.
    pub const RUN_SUBMITTED: &str = "run.submitted";
    /// A run changed status.
    pub const RUN_TRANSITION: &str = "run.transition";
    /// A step failure was classified.
    pub const RUN_FAILURE_CLASSIFIED: &str = "run.failure_classified";
    /// A step is being retried in place.
    pub const RUN_RETRY_SCHEDULED: &str = "run.retry_scheduled";
    /// A run reached a terminal status.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// A worker lease expired and its task went back to pending.
    pub const TASK_REQUEUED: &str = "task.requeued";
    /// A worker was evicted.
    pub const WORKER_EVICTED: &str = "worker.evicted";
    /// An evicted worker registered again.
    pub const WORKER_REJOINED: &str = "worker.rejoined";
}
