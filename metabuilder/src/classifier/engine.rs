//! Pattern-based failure classification with rule overlays.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::patterns::{PatternMatch, PatternTable};
use super::{BackoffInfo, Evidence, FailureSignal, FailureType, Severity};

const MAX_MESSAGE_LEN: usize = 500;

/// Classifier tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Matches below this confidence are discarded.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    /// Consecutive unknown failures (including the current one) that force a re-plan.
    /// Zero disables the overlay.
    #[serde(default = "default_consecutive_unknown_threshold")]
    pub consecutive_unknown_threshold: usize,
}

fn default_confidence_floor() -> f64 {
    0.3
}

fn default_consecutive_unknown_threshold() -> usize {
    2
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            consecutive_unknown_threshold: default_consecutive_unknown_threshold(),
        }
    }
}

impl ClassifierConfig {
    /// Sets the confidence floor.
    #[must_use]
    pub fn with_confidence_floor(mut self, floor: f64) -> Self {
        self.confidence_floor = floor;
        self
    }

    /// Sets the consecutive unknown threshold.
    #[must_use]
    pub fn with_consecutive_unknown_threshold(mut self, threshold: usize) -> Self {
        self.consecutive_unknown_threshold = threshold;
        self
    }
}

/// Turns raw step logs into a [`FailureSignal`].
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    table: PatternTable,
    config: ClassifierConfig,
    retry_after: Option<Regex>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl FailureClassifier {
    /// Creates a classifier over the built-in pattern table.
    #[must_use]
    pub fn new(config: ClassifierConfig) -> Self {
        Self::with_table(PatternTable::builtin(), config)
    }

    /// Creates a classifier over a custom pattern table.
    #[must_use]
    pub fn with_table(table: PatternTable, config: ClassifierConfig) -> Self {
        Self {
            table,
            config,
            retry_after: Regex::new(r"(?i)retry-after:\s*(\d+)").ok(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classifies a failure.
    ///
    /// `prior_signals` are the signals already recorded for the same run,
    /// oldest first.
    #[must_use]
    pub fn classify(
        &self,
        source: &str,
        logs: &str,
        prior_signals: &[FailureSignal],
    ) -> FailureSignal {
        let backoff = self.extract_backoff(logs);

        let signal = match self.best_match(logs) {
            Some(hit) => FailureSignal::new(hit.failure_type, source, truncate(&hit.line))
                .with_evidence(Evidence {
                    pattern: hit.pattern,
                    matched: hit.matched,
                    confidence: hit.confidence,
                }),
            None => FailureSignal::new(FailureType::Unknown, source, fallback_message(logs)),
        }
        .with_backoff(backoff);

        let signal = self.apply_overlays(signal, prior_signals);

        debug!(
            source,
            failure_type = %signal.failure_type,
            confidence = signal.confidence(),
            can_retry = signal.can_retry,
            requires_replan = signal.requires_replan,
            "Classified failure"
        );

        signal
    }

    /// Returns the strongest hit above the floor.
    #[must_use]
    pub fn best_match(&self, logs: &str) -> Option<PatternMatch> {
        self.table
            .matches(logs)
            .into_iter()
            .filter(|hit| hit.confidence >= self.config.confidence_floor)
            .reduce(|best, hit| if outranks(&hit, &best) { hit } else { best })
    }

    /// Scans for an explicit `Retry-After: <seconds>` marker.
    #[must_use]
    pub fn extract_backoff(&self, logs: &str) -> Option<BackoffInfo> {
        let captures = self.retry_after.as_ref()?.captures(logs)?;
        let seconds = captures.get(1)?.as_str().parse::<u64>().ok()?;
        Some(BackoffInfo {
            retry_after_seconds: seconds,
            raw: captures.get(0)?.as_str().to_string(),
        })
    }

    fn apply_overlays(&self, signal: FailureSignal, prior_signals: &[FailureSignal]) -> FailureSignal {
        let threshold = self.config.consecutive_unknown_threshold;
        if threshold == 0 || !signal.is_unknown() {
            return signal;
        }

        let trailing_unknown = prior_signals
            .iter()
            .rev()
            .take_while(|s| s.is_unknown())
            .count();
        if trailing_unknown + 1 < threshold {
            return signal;
        }

        let streak = trailing_unknown + 1;
        FailureSignal {
            message: format!(
                "{streak} consecutive unexplained failures; last: {}",
                signal.message
            ),
            evidence: Some(Evidence {
                pattern: format!("consecutive_unknown>={threshold}"),
                matched: signal.message.clone(),
                confidence: 1.0,
            }),
            severity: Severity::High,
            can_retry: false,
            requires_replan: true,
            synthetic: true,
            ..signal
        }
    }
}

fn outranks(candidate: &PatternMatch, best: &PatternMatch) -> bool {
    if (candidate.confidence - best.confidence).abs() > f64::EPSILON {
        return candidate.confidence > best.confidence;
    }
    candidate.failure_type.priority() < best.failure_type.priority()
}

fn fallback_message(logs: &str) -> String {
    logs.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map_or_else(|| "Unclassified failure".to_string(), truncate)
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_MESSAGE_LEN {
        return text.to_string();
    }
    let mut end = MAX_MESSAGE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
