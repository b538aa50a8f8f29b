//! Error types for the orchestration core.
//!
//! Classifier-produced failure types govern local recovery inside a run and
//! live in [`crate::classifier`]. The errors here are the ones that escape an
//! operation: pool bookkeeping violations, canary misuse, configuration
//! problems and run-level escalations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::executor::QueueClass;

/// The main error type for metabuilder operations.
#[derive(Debug, Error)]
pub enum MetaBuilderError {
    /// A worker pool operation failed.
    #[error("{0}")]
    Pool(#[from] PoolError),

    /// A canary operation failed.
    #[error("{0}")]
    Canary(#[from] CanaryError),

    /// Configuration could not be loaded or validated.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A run-level operation failed.
    #[error("{0}")]
    Run(#[from] RunError),

    /// An agent invocation failed outside of a task.
    #[error("{0}")]
    Agent(#[from] crate::agents::AgentError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The worker is not registered.
    #[error("Unknown worker: {worker_id}")]
    UnknownWorker {
        /// The worker id.
        worker_id: String,
    },

    /// The task does not exist.
    #[error("Unknown task: {task_id}")]
    UnknownTask {
        /// The task id.
        task_id: Uuid,
    },

    /// The task is not currently assigned to the reporting worker.
    #[error("Task {task_id} is not assigned to worker {worker_id}")]
    TaskNotAssigned {
        /// The task id.
        task_id: Uuid,
        /// The worker that attempted the operation.
        worker_id: String,
    },

    /// The worker has been declared dead.
    #[error("Worker {worker_id} is dead")]
    WorkerDead {
        /// The worker id.
        worker_id: String,
    },

    /// No live worker serves the queue class.
    #[error("No live workers for queue class '{queue_class}'")]
    NoWorkers {
        /// The queue class without workers.
        queue_class: QueueClass,
    },

    /// The task waiter was dropped before completion.
    #[error("Task {task_id} waiter closed")]
    Closed {
        /// The task id.
        task_id: Uuid,
    },
}

impl PoolError {
    /// Creates an unknown worker error.
    #[must_use]
    pub fn unknown_worker(worker_id: impl Into<String>) -> Self {
        Self::UnknownWorker {
            worker_id: worker_id.into(),
        }
    }

    /// Creates a task-not-assigned error.
    #[must_use]
    pub fn not_assigned(task_id: Uuid, worker_id: impl Into<String>) -> Self {
        Self::TaskNotAssigned {
            task_id,
            worker_id: worker_id.into(),
        }
    }
}

/// Errors raised by the canary manager.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CanaryError {
    /// No sample was assigned for the run.
    #[error("No canary sample for run {run_id}")]
    UnknownRun {
        /// The run id.
        run_id: Uuid,
    },

    /// The canary percentage is outside `[0, 1]`.
    #[error("Invalid canary percent {value}: must be within [0.0, 1.0]")]
    InvalidPercent {
        /// The rejected value.
        value: f64,
    },
}

/// Errors that escalate a run or reject a run-level request.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RunError {
    /// The run does not exist.
    #[error("Run not found: {run_id}")]
    NotFound {
        /// The run id.
        run_id: Uuid,
    },

    /// An approval decision arrived for a run that is not paused.
    #[error("Run {run_id} is not awaiting approval (status: {status})")]
    NotAwaitingApproval {
        /// The run id.
        run_id: Uuid,
        /// The current status.
        status: String,
    },

    /// The run used up its iteration budget.
    #[error("Iteration budget exhausted after {iterations} iterations")]
    IterationBudgetExhausted {
        /// Iterations consumed.
        iterations: u32,
    },

    /// A resource limit was exceeded.
    #[error("Limit exceeded: {limit} (used {used}, allowed {allowed})")]
    LimitExceeded {
        /// The limit name.
        limit: String,
        /// The amount used.
        used: f64,
        /// The configured allowance.
        allowed: f64,
    },

    /// The state machine rejected a status change.
    #[error("Run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The run id.
        run_id: Uuid,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// No workers can take the run's tasks.
    #[error("Worker pool exhausted: {reason}")]
    PoolExhausted {
        /// Why the pool could not serve the run.
        reason: String,
    },
}

impl RunError {
    /// Creates a limit exceeded error.
    #[must_use]
    pub fn limit_exceeded(limit: impl Into<String>, used: f64, allowed: f64) -> Self {
        Self::LimitExceeded {
            limit: limit.into(),
            used,
            allowed,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        match self {
            Self::NotFound { run_id } => {
                map.insert("type".to_string(), serde_json::json!("RunNotFound"));
                map.insert("run_id".to_string(), serde_json::json!(run_id.to_string()));
            }
            Self::NotAwaitingApproval { run_id, status } => {
                map.insert("type".to_string(), serde_json::json!("NotAwaitingApproval"));
                map.insert("run_id".to_string(), serde_json::json!(run_id.to_string()));
                map.insert("status".to_string(), serde_json::json!(status));
            }
            Self::IterationBudgetExhausted { iterations } => {
                map.insert("type".to_string(), serde_json::json!("IterationBudgetExhausted"));
                map.insert("iterations".to_string(), serde_json::json!(iterations));
            }
            Self::LimitExceeded { limit, used, allowed } => {
                map.insert("type".to_string(), serde_json::json!("LimitExceeded"));
                map.insert("limit".to_string(), serde_json::json!(limit));
                map.insert("used".to_string(), serde_json::json!(used));
                map.insert("allowed".to_string(), serde_json::json!(allowed));
            }
            Self::InvalidTransition { run_id, from, to } => {
                map.insert("type".to_string(), serde_json::json!("InvalidTransition"));
                map.insert("run_id".to_string(), serde_json::json!(run_id.to_string()));
                map.insert("from".to_string(), serde_json::json!(from));
                map.insert("to".to_string(), serde_json::json!(to));
            }
            Self::PoolExhausted { reason } => {
                map.insert("type".to_string(), serde_json::json!("PoolExhausted"));
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds an invalid value.
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        /// The offending field path.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration document could not be parsed.
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An environment override could not be parsed.
    #[error("Invalid environment override {var}={value}")]
    Env {
        /// The variable name.
        var: String,
        /// The raw value.
        value: String,
    },
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        let task_id = Uuid::new_v4();
        let err = PoolError::not_assigned(task_id, "w-1");
        assert!(err.to_string().contains("w-1"));
        assert!(err.to_string().contains(&task_id.to_string()));
    }

    #[test]
    fn test_run_error_to_dict() {
        let err = RunError::limit_exceeded("max_cost_usd", 12.5, 10.0);
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "LimitExceeded");
        assert_eq!(dict.get("limit").unwrap(), "max_cost_usd");
        assert!(dict.get("message").unwrap().as_str().unwrap().contains("12.5"));
    }

    #[test]
    fn test_error_conversion() {
        let err: MetaBuilderError = CanaryError::InvalidPercent { value: 1.5 }.into();
        assert!(matches!(err, MetaBuilderError::Canary(_)));
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn test_config_error_invalid() {
        let err = ConfigError::invalid("canary.canary_percent", "must be <= 1.0");
        assert!(err.to_string().contains("canary.canary_percent"));
    }
}
