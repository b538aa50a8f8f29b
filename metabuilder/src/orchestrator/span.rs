//! Audit spans appended to a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RunStatus;
use crate::agents::AgentRole;

/// What a span records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpanKind {
    /// One attempt of one step.
    Step {
        /// Step id.
        step_id: String,
        /// Agent invoked.
        role: AgentRole,
        /// Retry attempt within the iteration, from 0.
        attempt: u32,
        /// Whether the attempt succeeded.
        success: bool,
        /// Tokens used.
        tokens_used: u64,
        /// Cost in USD.
        cost_usd: f64,
        /// Prompt-cache hits reported by the agent.
        #[serde(default)]
        cache_hits: u64,
        /// Input handed to the agent.
        #[serde(default)]
        input: serde_json::Value,
        /// Agent output, when the agent returned one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        /// Failure message, when the attempt failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A status change.
    Transition {
        /// Previous status.
        from: RunStatus,
        /// New status.
        to: RunStatus,
        /// Why.
        reason: String,
    },
}

/// An entry in a run's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpan {
    /// Span id.
    pub id: Uuid,
    /// Owning run.
    pub run_id: Uuid,
    /// Iteration the span belongs to.
    pub iteration: u32,
    /// Details.
    #[serde(flatten)]
    pub kind: SpanKind,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub ended_at: DateTime<Utc>,
    /// Duration in milliseconds.
    pub duration_ms: f64,
}

impl AgentSpan {
    /// Creates a span ending now.
    #[must_use]
    pub fn new(run_id: Uuid, iteration: u32, kind: SpanKind, started_at: DateTime<Utc>) -> Self {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at)
            .num_microseconds()
            .map_or(0.0, |us| us as f64 / 1000.0);
        Self {
            id: Uuid::new_v4(),
            run_id,
            iteration,
            kind,
            started_at,
            ended_at,
            duration_ms,
        }
    }

    /// Creates an instantaneous transition span.
    #[must_use]
    pub fn transition(run_id: Uuid, iteration: u32, from: RunStatus, to: RunStatus, reason: impl Into<String>) -> Self {
        Self::new(
            run_id,
            iteration,
            SpanKind::Transition {
                from,
                to,
                reason: reason.into(),
            },
            Utc::now(),
        )
    }

    /// Returns true for step spans.
    #[must_use]
    pub fn is_step(&self) -> bool {
        matches!(self.kind, SpanKind::Step { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_span_serializes_flat() {
        let run_id = Uuid::new_v4();
        let span = AgentSpan::transition(run_id, 1, RunStatus::Pending, RunStatus::Planning, "started");
        let json = serde_json::to_value(&span).unwrap();

        assert_eq!(json["kind"], "transition");
        assert_eq!(json["from"], "pending");
        assert_eq!(json["to"], "planning");
        assert!(!span.is_step());
        assert!(span.duration_ms >= 0.0);
    }

    #[test]
    fn test_step_span() {
        let span = AgentSpan::new(
            Uuid::new_v4(),
            2,
            SpanKind::Step {
                step_id: "codegen_engineer.generate".to_string(),
                role: AgentRole::CodegenEngineer,
                attempt: 0,
                success: true,
                tokens_used: 500,
                cost_usd: 0.2,
                cache_hits: 3,
                input: serde_json::json!({"goal": "todo app"}),
                output: Some(serde_json::json!({"artifacts": {}})),
                error: None,
            },
            Utc::now(),
        );
        assert!(span.is_step());
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["role"], "codegen_engineer");
        assert_eq!(json["cache_hits"], 3);
        assert_eq!(json["input"]["goal"], "todo app");
        assert!(json.get("error").is_none());
    }
}
