//! Maps a classified failure to the run's next move.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Phase, RetryConfig, RetryState, ReviewConfig};
use crate::classifier::{FailureSignal, FailureType};

/// What the orchestrator does after a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    /// Re-run the same step after a delay.
    RetryStep {
        /// Delay before the retry.
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    /// Start a new iteration at `phase`, feeding the failure back.
    Restart {
        /// Phase the new iteration starts from.
        phase: Phase,
    },
    /// Pause for a human decision.
    AwaitApproval,
}

/// Decides how to recover from `signal`.
///
/// Order: plan invalidation, security, code findings, retryable, and
/// otherwise a re-plan. Retries consume `state`; once exhausted a retryable
/// failure becomes a re-plan.
pub fn decide(
    signal: &FailureSignal,
    state: &mut RetryState,
    retry: &RetryConfig,
    review: &ReviewConfig,
) -> Decision {
    if signal.requires_replan {
        return Decision::Restart { phase: Phase::Planning };
    }

    match signal.failure_type {
        FailureType::Security if review.pause_on_security => return Decision::AwaitApproval,
        FailureType::Security => return Decision::Restart { phase: Phase::Planning },
        FailureType::TestAssert | FailureType::Lint => {
            return Decision::Restart { phase: Phase::Generating };
        }
        _ => {}
    }

    if signal.can_retry {
        if let Some(delay) = state.next_delay(retry, signal) {
            return Decision::RetryStep { delay };
        }
    }
    Decision::Restart { phase: Phase::Planning }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::BackoffInfo;
    use crate::orchestrator::JitterStrategy;

    fn retry() -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(2)
            .with_base_delay_ms(10)
            .with_jitter(JitterStrategy::None)
    }

    fn decide_once(signal: &FailureSignal, review: &ReviewConfig) -> Decision {
        decide(signal, &mut RetryState::new(), &retry(), review)
    }

    #[test]
    fn test_code_findings_regenerate() {
        for ty in [FailureType::TestAssert, FailureType::Lint] {
            let signal = FailureSignal::new(ty, "qa_evaluator.evaluate", "failed");
            assert_eq!(
                decide_once(&signal, &ReviewConfig::default()),
                Decision::Restart { phase: Phase::Generating }
            );
        }
    }

    #[test]
    fn test_security_pauses_or_replans() {
        let signal = FailureSignal::new(FailureType::Security, "security_compliance.scan", "secret");
        assert_eq!(decide_once(&signal, &ReviewConfig::default()), Decision::AwaitApproval);
        assert_eq!(
            decide_once(&signal, &ReviewConfig::default().with_pause_on_security(false)),
            Decision::Restart { phase: Phase::Planning }
        );
    }

    #[test]
    fn test_dependency_replans() {
        let signal = FailureSignal::new(FailureType::Dependency, "codegen_engineer.generate", "missing");
        assert_eq!(
            decide_once(&signal, &ReviewConfig::default()),
            Decision::Restart { phase: Phase::Planning }
        );
    }

    #[test]
    fn test_retryable_until_exhausted() {
        let signal = FailureSignal::new(FailureType::Transient, "system_designer.design", "reset");
        let mut state = RetryState::new();
        let config = retry();
        let review = ReviewConfig::default();

        assert_eq!(
            decide(&signal, &mut state, &config, &review),
            Decision::RetryStep { delay: Duration::from_millis(10) }
        );
        assert_eq!(
            decide(&signal, &mut state, &config, &review),
            Decision::RetryStep { delay: Duration::from_millis(20) }
        );
        assert_eq!(
            decide(&signal, &mut state, &config, &review),
            Decision::Restart { phase: Phase::Planning }
        );
    }

    #[test]
    fn test_rate_limit_honors_retry_after() {
        let signal = FailureSignal::new(FailureType::RateLimit, "product_architect.analyze_goal", "429")
            .with_backoff(Some(BackoffInfo {
                retry_after_seconds: 2,
                raw: "Retry-After: 2".to_string(),
            }));
        assert_eq!(
            decide_once(&signal, &ReviewConfig::default()),
            Decision::RetryStep { delay: Duration::from_secs(2) }
        );
    }

    #[test]
    fn test_synthetic_replan_overrides_retry() {
        let mut signal = FailureSignal::new(FailureType::Unknown, "step", "again");
        signal.can_retry = false;
        signal.requires_replan = true;
        signal.synthetic = true;
        assert_eq!(
            decide_once(&signal, &ReviewConfig::default()),
            Decision::Restart { phase: Phase::Planning }
        );
    }

    #[test]
    fn test_decision_serializes() {
        let json = serde_json::to_value(Decision::RetryStep { delay: Duration::from_millis(1500) }).unwrap();
        assert_eq!(json["action"], "retry_step");
        assert_eq!(json["delay"], 1500);
    }
}
