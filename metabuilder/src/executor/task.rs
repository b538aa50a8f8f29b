//! Task records owned by the worker pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::agents::{AgentResult, AgentRole};

/// Scheduling partition isolating resource-distinct work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    /// CPU-bound codegen and evaluation.
    Cpu,
    /// I/O-bound calls to external tooling.
    Io,
}

impl QueueClass {
    /// Every queue class.
    pub const ALL: [Self; 2] = [Self::Cpu, Self::Io];
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker.
    #[default]
    Pending,
    /// Assigned and executing.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Returns true for completed or failed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The agent call a task performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// The agent to invoke.
    pub role: AgentRole,
    /// The action to request.
    pub action: String,
    /// Structured input.
    pub input: serde_json::Value,
}

/// The error side of a task outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Short description.
    pub message: String,
    /// Raw logs for classification.
    pub logs: String,
}

impl TaskFailure {
    /// Creates a failure.
    #[must_use]
    pub fn new(message: impl Into<String>, logs: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            logs: logs.into(),
        }
    }
}

/// A request to enqueue work.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Owning run.
    pub run_id: Uuid,
    /// Step within the run.
    pub step_id: String,
    /// Queue class.
    pub queue_class: QueueClass,
    /// Agent call, if any.
    pub payload: Option<TaskPayload>,
    /// Execution timeout.
    pub timeout: Option<Duration>,
}

impl TaskRequest {
    /// Creates a bare request.
    #[must_use]
    pub fn new(run_id: Uuid, step_id: impl Into<String>, queue_class: QueueClass) -> Self {
        Self {
            run_id,
            step_id: step_id.into(),
            queue_class,
            payload: None,
            timeout: None,
        }
    }

    /// Sets the agent payload.
    #[must_use]
    pub fn with_payload(mut self, payload: TaskPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id.
    pub id: Uuid,
    /// Owning run.
    pub run_id: Uuid,
    /// Step within the run.
    pub step_id: String,
    /// Queue class.
    pub queue_class: QueueClass,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Worker currently holding the task.
    pub assigned_worker: Option<String>,
    /// Agent call, if any.
    pub payload: Option<TaskPayload>,
    /// Result on completion.
    pub result: Option<AgentResult>,
    /// Error on failure.
    pub error: Option<TaskFailure>,
    /// Execution timeout.
    #[serde(with = "duration_secs_opt", default)]
    pub timeout: Option<Duration>,
    /// Times the task was handed to a worker.
    pub attempts: u32,
    /// When the task was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When the current attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub(crate) fn from_request(request: TaskRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: request.run_id,
            step_id: request.step_id,
            queue_class: request.queue_class,
            status: TaskStatus::Pending,
            assigned_worker: None,
            payload: request.payload,
            result: None,
            error: None,
            timeout: request.timeout,
            attempts: 0,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Returns the outcome of a terminal task.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<&AgentResult, &TaskFailure>> {
        match self.status {
            TaskStatus::Completed => self.result.as_ref().map(Ok),
            TaskStatus::Failed => self.error.as_ref().map(Err),
            TaskStatus::Pending | TaskStatus::Running => None,
        }
    }
}

mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.map(Duration::from_secs_f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_class_display() {
        assert_eq!(QueueClass::Cpu.to_string(), "cpu");
        assert_eq!(QueueClass::Io.to_string(), "io");
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_task_from_request() {
        let run_id = Uuid::new_v4();
        let task = Task::from_request(
            TaskRequest::new(run_id, "codegen.generate", QueueClass::Cpu)
                .with_timeout(Duration::from_secs(5)),
        );

        assert_eq!(task.run_id, run_id);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert!(task.outcome().is_none());
    }

    #[test]
    fn test_task_serialize_timeout() {
        let task = Task::from_request(
            TaskRequest::new(Uuid::new_v4(), "s", QueueClass::Io)
                .with_timeout(Duration::from_millis(1500)),
        );
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["timeout"], 1.5);
        assert_eq!(json["queue_class"], "io");

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.timeout, Some(Duration::from_millis(1500)));
    }
}
