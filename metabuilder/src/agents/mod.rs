//! Agent abstraction invoked by pipeline steps.
//!
//! Agents are the pluggable units of work behind each step: an LLM call, a
//! static analyzer, a template renderer. The orchestration core only sees
//! the uniform [`Agent::execute`] contract.

mod registry;
mod role;

pub use registry::AgentRegistry;
pub use role::AgentRole;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Output of a successful agent invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentResult {
    /// Structured output.
    pub output: serde_json::Value,
    /// Tokens consumed.
    #[serde(default)]
    pub tokens_used: u64,
    /// Prompt cache hits.
    #[serde(default)]
    pub cache_hits: u64,
    /// Cost of the call in USD.
    #[serde(default)]
    pub cost_usd: f64,
    /// Captured logs.
    #[serde(default)]
    pub logs: String,
}

impl AgentResult {
    /// Creates a result with the given output.
    #[must_use]
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    /// Sets token usage.
    #[must_use]
    pub fn with_tokens(mut self, tokens_used: u64) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    /// Sets cache hits.
    #[must_use]
    pub fn with_cache_hits(mut self, cache_hits: u64) -> Self {
        self.cache_hits = cache_hits;
        self
    }

    /// Sets the cost.
    #[must_use]
    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    /// Sets the logs.
    #[must_use]
    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = logs.into();
        self
    }
}

/// Errors returned by agents.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum AgentError {
    /// The agent ran and failed; `logs` are what the classifier reads.
    #[error("Agent execution failed: {message}")]
    Failed {
        /// Short description.
        message: String,
        /// Raw output of the failing step.
        logs: String,
    },

    /// The agent does not support the requested action.
    #[error("Unsupported action '{action}' for agent {role}")]
    UnsupportedAction {
        /// The agent role.
        role: AgentRole,
        /// The action.
        action: String,
    },

    /// No agent is registered for the role.
    #[error("No agent registered for role {role}")]
    NotRegistered {
        /// The missing role.
        role: AgentRole,
    },

    /// An internal failure inside the agent.
    #[error("Agent internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Creates a failure with logs.
    #[must_use]
    pub fn failed(message: impl Into<String>, logs: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            logs: logs.into(),
        }
    }

    /// Text the classifier should inspect.
    #[must_use]
    pub fn logs(&self) -> String {
        match self {
            Self::Failed { message, logs } if logs.is_empty() => message.clone(),
            Self::Failed { message, logs } => format!("{message}\n{logs}"),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

/// Trait for pipeline agents.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Agent: Send + Sync + Debug {
    /// The role this agent fills.
    fn role(&self) -> AgentRole;

    /// Executes an action.
    ///
    /// # Arguments
    ///
    /// * `action` - The step action (e.g. "generate")
    /// * `payload` - Structured step input
    async fn execute(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<AgentResult, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_result_builder() {
        let result = AgentResult::new(serde_json::json!({"ok": true}))
            .with_tokens(120)
            .with_cache_hits(3)
            .with_cost(0.25)
            .with_logs("done");

        assert_eq!(result.tokens_used, 120);
        assert_eq!(result.cache_hits, 3);
        assert!((result.cost_usd - 0.25).abs() < f64::EPSILON);
        assert_eq!(result.logs, "done");
    }

    #[test]
    fn test_agent_error_logs() {
        let err = AgentError::failed("tests failed", "AssertionError: assert 1 == 2");
        assert_eq!(err.logs(), "tests failed\nAssertionError: assert 1 == 2");

        let err = AgentError::failed("Connection reset by peer", "");
        assert_eq!(err.logs(), "Connection reset by peer");
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: AgentError = anyhow::anyhow!("disk full").context("writing plan").into();
        assert!(matches!(err, AgentError::Internal(ref msg) if msg.contains("disk full")));
    }

    #[tokio::test]
    async fn test_mock_agent() {
        let mut mock = MockAgent::new();
        mock.expect_role().return_const(AgentRole::Reviewer);
        mock.expect_execute()
            .withf(|action, _| action == "review")
            .returning(|_, _| Ok(AgentResult::new(serde_json::json!({"approved": true}))));

        assert_eq!(mock.role(), AgentRole::Reviewer);
        let result = mock.execute("review", serde_json::Value::Null).await.unwrap();
        assert_eq!(result.output["approved"], true);
    }
}
