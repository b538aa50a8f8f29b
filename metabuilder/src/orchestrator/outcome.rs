//! What a finished run hands back to its caller.

use serde::{Deserialize, Serialize};

use crate::classifier::FailureSignal;

/// Summary of the evaluation step's output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Quality score, when the evaluator reported one.
    pub score: Option<f64>,
    /// Whether evaluation passed.
    pub passed: bool,
    /// Follow-up suggestions.
    pub recommendations: Vec<String>,
}

impl EvaluationReport {
    /// Reads `score`, `passed` and `recommendations` from an evaluator output.
    ///
    /// A missing `passed` means the step succeeded and counts as passed.
    #[must_use]
    pub fn from_output(output: &serde_json::Value) -> Self {
        let recommendations = output
            .get("recommendations")
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            score: output.get("score").and_then(serde_json::Value::as_f64),
            passed: output
                .get("passed")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(true),
            recommendations,
        }
    }
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The pipeline completed (and was approved, when review was required).
    Succeeded {
        /// Generated artifacts from the codegen step.
        artifacts: serde_json::Value,
        /// Evaluation summary.
        report: EvaluationReport,
    },
    /// The run gave up.
    Failed {
        /// Why.
        reason: String,
        /// Every classified failure, oldest first.
        failure_chain: Vec<FailureSignal>,
    },
    /// A reviewer rejected the result.
    RolledBack {
        /// Reviewer comments.
        reason: String,
    },
}

impl RunOutcome {
    /// Returns true for a successful outcome.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_from_output() {
        let report = EvaluationReport::from_output(&serde_json::json!({
            "score": 0.92,
            "passed": true,
            "recommendations": ["add pagination", 3, "cache lookups"],
        }));
        assert_eq!(report.score, Some(0.92));
        assert!(report.passed);
        assert_eq!(report.recommendations, vec!["add pagination", "cache lookups"]);
    }

    #[test]
    fn test_report_defaults() {
        let report = EvaluationReport::from_output(&serde_json::Value::Null);
        assert_eq!(report, EvaluationReport { score: None, passed: true, recommendations: vec![] });
    }

    #[test]
    fn test_outcome_tagging() {
        let outcome = RunOutcome::Failed {
            reason: "Iteration budget exhausted after 5 iterations".to_string(),
            failure_chain: vec![],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(!outcome.is_success());
    }
}
