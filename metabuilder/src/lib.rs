//! # Metabuilder
//!
//! Orchestration core for iterative multi-agent code generation.
//!
//! A run takes a goal through planning, generation and evaluation. Each
//! phase is a sequence of agent steps executed on a shared worker pool:
//!
//! - **Failure classification**: step logs become typed failure signals
//! - **Worker pool**: per-class FIFO queues, worker leases and a reaper that
//!   recovers tasks from crashed workers
//! - **Canary rollout**: deterministic cohort assignment between two pipeline
//!   versions, with statistical promotion and rollback recommendations
//! - **Run orchestration**: a state machine that retries, regenerates,
//!   re-plans or pauses for approval depending on the failure
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use metabuilder::prelude::*;
//!
//! let pool = Arc::new(WorkerPool::new(PoolConfig::default()));
//! let executor = Arc::new(DistributedExecutor::new(pool, Arc::new(agents)));
//! executor.spawn_workers(QueueClass::Cpu, 4);
//! executor.spawn_workers(QueueClass::Io, 4);
//! executor.start_reaper();
//!
//! let canary = Arc::new(CanaryManager::new(CanaryConfig::default()));
//! let orchestrator = Arc::new(RunOrchestrator::new(executor, canary));
//!
//! let run_id = orchestrator.submit_run(RunRequest::new("acme", "build a todo app"));
//! let run = orchestrator.wait_for_settled(run_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss
)]

pub mod agents;
pub mod canary;
pub mod cancellation;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod orchestrator;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::agents::{Agent, AgentError, AgentRegistry, AgentResult, AgentRole};
    pub use crate::canary::{
        CanaryConfig, CanaryEvaluation, CanaryManager, Cohort, CompletionRecord, Recommendation,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::classifier::{ClassifierConfig, FailureClassifier, FailureSignal, FailureType};
    pub use crate::config::MetaBuilderConfig;
    pub use crate::errors::{CanaryError, ConfigError, MetaBuilderError, PoolError, RunError};
    pub use crate::events::{CollectingEventSink, Event, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{DistributedExecutor, PoolConfig, QueueClass, Task, TaskRequest, WorkerPool};
    pub use crate::observability::{init_logging, LogFormat, LoggingConfig};
    pub use crate::orchestrator::{
        OrchestratorConfig, RetryConfig, ReviewConfig, Run, RunLimits, RunOrchestrator, RunOutcome,
        RunRequest, RunStatus,
    };
}
