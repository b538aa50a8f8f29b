//! Canned agents for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use crate::agents::{Agent, AgentError, AgentResult, AgentRole};

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Requested action.
    pub action: String,
    /// Input payload.
    pub input: serde_json::Value,
}

fn echo(role: AgentRole, action: &str, input: serde_json::Value) -> AgentResult {
    AgentResult::new(serde_json::json!({
        "role": role,
        "action": action,
        "input": input,
    }))
    .with_tokens(100)
    .with_cost(0.01)
}

/// Succeeds with an echo of its input.
#[derive(Debug)]
pub struct EchoAgent {
    role: AgentRole,
    calls: Mutex<Vec<RecordedCall>>,
}

impl EchoAgent {
    /// Creates an echo agent for a role.
    #[must_use]
    pub fn new(role: AgentRole) -> Self {
        Self {
            role,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Recorded invocations.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn execute(&self, action: &str, payload: serde_json::Value) -> Result<AgentResult, AgentError> {
        self.calls.lock().push(RecordedCall {
            action: action.to_string(),
            input: payload.clone(),
        });
        Ok(echo(self.role, action, payload))
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Succeed(AgentResult),
    Fail { message: String, logs: String },
}

/// Replays a script of outcomes, then echoes.
///
/// ```rust,ignore
/// let qa = ScriptedAgent::new(AgentRole::QaEvaluator)
///     .then_fail("tests failed", "AssertionError: expected 3")
///     .then_ok(AgentResult::new(json!({"passed": true})));
/// ```
#[derive(Debug)]
pub struct ScriptedAgent {
    role: AgentRole,
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedAgent {
    /// Creates an agent with an empty script.
    #[must_use]
    pub fn new(role: AgentRole) -> Self {
        Self {
            role,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Appends a success.
    #[must_use]
    pub fn then_ok(self, result: AgentResult) -> Self {
        self.script.lock().push_back(Scripted::Succeed(result));
        self
    }

    /// Appends a failure.
    #[must_use]
    pub fn then_fail(self, message: impl Into<String>, logs: impl Into<String>) -> Self {
        self.script.lock().push_back(Scripted::Fail {
            message: message.into(),
            logs: logs.into(),
        });
        self
    }

    /// Appends the same failure `times` times.
    #[must_use]
    pub fn then_fail_times(self, times: usize, message: &str, logs: &str) -> Self {
        (0..times).fold(self, |agent, _| agent.then_fail(message, logs))
    }

    /// Number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Recorded invocations.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Script entries not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn execute(&self, action: &str, payload: serde_json::Value) -> Result<AgentResult, AgentError> {
        self.calls.lock().push(RecordedCall {
            action: action.to_string(),
            input: payload.clone(),
        });
        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Succeed(result)) => Ok(result),
            Some(Scripted::Fail { message, logs }) => Err(AgentError::failed(message, logs)),
            None => Ok(echo(self.role, action, payload)),
        }
    }
}

/// Always fails with the same logs.
#[derive(Debug)]
pub struct FailingAgent {
    role: AgentRole,
    message: String,
    logs: String,
}

impl FailingAgent {
    /// Creates a failing agent.
    #[must_use]
    pub fn new(role: AgentRole, message: impl Into<String>, logs: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
            logs: logs.into(),
        }
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn execute(&self, _action: &str, _payload: serde_json::Value) -> Result<AgentResult, AgentError> {
        Err(AgentError::failed(self.message.clone(), self.logs.clone()))
    }
}

/// Sleeps before echoing.
#[derive(Debug)]
pub struct SlowAgent {
    role: AgentRole,
    delay: Duration,
}

impl SlowAgent {
    /// Creates a slow agent.
    #[must_use]
    pub fn new(role: AgentRole, delay: Duration) -> Self {
        Self { role, delay }
    }
}

#[async_trait]
impl Agent for SlowAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn execute(&self, action: &str, payload: serde_json::Value) -> Result<AgentResult, AgentError> {
        tokio::time::sleep(self.delay).await;
        Ok(echo(self.role, action, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_agent() {
        let agent = EchoAgent::new(AgentRole::SystemDesigner);
        let result = agent.execute("design", serde_json::json!({"goal": "x"})).await.unwrap();

        assert_eq!(result.output["action"], "design");
        assert_eq!(result.output["input"]["goal"], "x");
        assert_eq!(result.tokens_used, 100);
        assert_eq!(agent.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_agent_replays_then_echoes() {
        let agent = ScriptedAgent::new(AgentRole::QaEvaluator)
            .then_fail("tests failed", "AssertionError")
            .then_ok(AgentResult::new(serde_json::json!({"passed": true})));

        let first = agent.execute("evaluate", serde_json::Value::Null).await;
        assert!(matches!(first, Err(AgentError::Failed { ref logs, .. }) if logs == "AssertionError"));

        let second = agent.execute("evaluate", serde_json::Value::Null).await.unwrap();
        assert_eq!(second.output["passed"], true);

        let third = agent.execute("evaluate", serde_json::Value::Null).await.unwrap();
        assert_eq!(third.output["action"], "evaluate");
        assert_eq!(agent.call_count(), 3);
        assert_eq!(agent.remaining(), 0);
    }

    #[tokio::test]
    async fn test_failing_agent() {
        let agent = FailingAgent::new(AgentRole::SecurityCompliance, "scan failed", "hardcoded secret");
        let err = agent.execute("scan", serde_json::Value::Null).await.unwrap_err();
        assert!(err.logs().contains("hardcoded secret"));
    }

    #[tokio::test]
    async fn test_slow_agent() {
        let agent = SlowAgent::new(AgentRole::DevOps, Duration::from_millis(10));
        let start = std::time::Instant::now();
        agent.execute("package", serde_json::Value::Null).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
