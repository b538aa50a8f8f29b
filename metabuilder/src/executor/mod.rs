//! Distributed step execution.
//!
//! The [`WorkerPool`] owns every task and worker record and hands pending
//! tasks to idle workers of the matching [`QueueClass`] in FIFO order.
//! Workers hold time-boxed leases; a worker whose lease lapses is evicted
//! and its task requeued. The [`DistributedExecutor`] drives worker loops
//! and the lease reaper on the tokio runtime.

mod pool;
mod runtime;
mod stats;
mod task;
mod worker;

pub use pool::{PoolConfig, ReapReport, WorkerPool};
pub use runtime::DistributedExecutor;
pub use stats::{ClassQueueStats, QueueStats, WorkerStats};
pub use task::{QueueClass, Task, TaskFailure, TaskPayload, TaskRequest, TaskStatus};
pub use worker::{Worker, WorkerStatus};
