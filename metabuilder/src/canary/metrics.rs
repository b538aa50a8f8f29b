//! Derived cohort metrics and the success-rate comparison.

use serde::{Deserialize, Serialize};

use super::{CanarySample, Cohort};

/// Aggregate figures for one cohort over a window.
///
/// Rates are fractions of completed runs. An empty cohort reports zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CanaryMetrics {
    /// Share of runs that succeeded.
    pub success_rate: f64,
    /// Mean cost in USD.
    pub avg_cost: f64,
    /// Mean duration in seconds.
    pub avg_duration: f64,
    /// Share of runs with at least one retry.
    pub retry_rate: f64,
    /// Share of runs with at least one re-plan.
    pub replan_rate: f64,
    /// Share of runs with at least one rollback.
    pub rollback_rate: f64,
    /// `1 - 1/sqrt(n)`: grows with sample size, 0 when empty.
    pub confidence_score: f64,
    /// Completed runs aggregated.
    pub sample_size: usize,
}

impl CanaryMetrics {
    /// Aggregates the completed samples of `cohort`.
    #[must_use]
    pub fn from_samples<'a>(cohort: Cohort, samples: impl IntoIterator<Item = &'a CanarySample>) -> Self {
        let mut n = 0usize;
        let (mut successes, mut retried, mut replanned, mut rolled_back) = (0usize, 0usize, 0usize, 0usize);
        let (mut cost, mut duration) = (0.0, 0.0);

        for sample in samples.into_iter().filter(|s| s.cohort == cohort) {
            let Some(outcome) = sample.outcome.as_ref() else {
                continue;
            };
            n += 1;
            successes += usize::from(outcome.success);
            retried += usize::from(outcome.retry_count > 0);
            replanned += usize::from(outcome.replan_count > 0);
            rolled_back += usize::from(outcome.rollback_count > 0);
            cost += outcome.cost_usd;
            duration += outcome.duration_seconds;
        }

        if n == 0 {
            return Self::default();
        }

        let total = n as f64;
        Self {
            success_rate: successes as f64 / total,
            avg_cost: cost / total,
            avg_duration: duration / total,
            retry_rate: retried as f64 / total,
            replan_rate: replanned as f64 / total,
            rollback_rate: rolled_back as f64 / total,
            confidence_score: 1.0 - 1.0 / total.sqrt(),
            sample_size: n,
        }
    }

    /// Number of successful runs, recovered from the rate.
    #[must_use]
    pub fn successes(&self) -> f64 {
        (self.success_rate * self.sample_size as f64).round()
    }
}

/// Control and experimental metrics side by side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortComparison {
    /// The current pipeline.
    pub control: CanaryMetrics,
    /// The candidate pipeline.
    pub experimental: CanaryMetrics,
}

impl CohortComparison {
    /// Builds both cohorts from one sample set.
    #[must_use]
    pub fn from_samples(samples: &[&CanarySample]) -> Self {
        Self {
            control: CanaryMetrics::from_samples(Cohort::Control, samples.iter().copied()),
            experimental: CanaryMetrics::from_samples(Cohort::Experimental, samples.iter().copied()),
        }
    }

    /// Experimental minus control success rate.
    #[must_use]
    pub fn success_delta(&self) -> f64 {
        self.experimental.success_rate - self.control.success_rate
    }

    /// Two-proportion z statistic for experimental vs control success.
    ///
    /// Negative when experimental does worse. Zero when either cohort is
    /// empty or the pooled rate is 0 or 1.
    #[must_use]
    pub fn success_z_score(&self) -> f64 {
        let n1 = self.control.sample_size as f64;
        let n2 = self.experimental.sample_size as f64;
        if n1 == 0.0 || n2 == 0.0 {
            return 0.0;
        }
        let pooled = (self.control.successes() + self.experimental.successes()) / (n1 + n2);
        let variance = pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2);
        if variance <= 0.0 {
            return 0.0;
        }
        self.success_delta() / variance.sqrt()
    }

    /// Relative cost change of experimental over control.
    #[must_use]
    pub fn cost_increase(&self) -> f64 {
        relative_increase(self.control.avg_cost, self.experimental.avg_cost)
    }

    /// Relative duration change of experimental over control.
    #[must_use]
    pub fn duration_increase(&self) -> f64 {
        relative_increase(self.control.avg_duration, self.experimental.avg_duration)
    }
}

fn relative_increase(baseline: f64, candidate: f64) -> f64 {
    if baseline <= 0.0 {
        return 0.0;
    }
    (candidate - baseline) / baseline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canary::CompletionRecord;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample(cohort: Cohort, record: Option<CompletionRecord>) -> CanarySample {
        let mut sample = CanarySample::new(Uuid::new_v4(), "t", cohort, Utc::now());
        if let Some(record) = record {
            sample.complete(record, Utc::now());
        }
        sample
    }

    #[test]
    fn test_empty_cohort_is_zeroed() {
        let metrics = CanaryMetrics::from_samples(Cohort::Experimental, std::iter::empty());
        assert_eq!(metrics, CanaryMetrics::default());
        assert_eq!(metrics.sample_size, 0);
    }

    #[test]
    fn test_aggregates_completed_only() {
        let samples = vec![
            sample(Cohort::Control, Some(CompletionRecord::succeeded(2.0, 10.0).with_counts(1, 0, 0))),
            sample(Cohort::Control, Some(CompletionRecord::failed(4.0, 30.0).with_counts(0, 2, 1))),
            sample(Cohort::Control, None),
            sample(Cohort::Experimental, Some(CompletionRecord::succeeded(1.0, 5.0))),
        ];

        let control = CanaryMetrics::from_samples(Cohort::Control, &samples);
        assert_eq!(control.sample_size, 2);
        assert!((control.success_rate - 0.5).abs() < 1e-9);
        assert!((control.avg_cost - 3.0).abs() < 1e-9);
        assert!((control.avg_duration - 20.0).abs() < 1e-9);
        assert!((control.retry_rate - 0.5).abs() < 1e-9);
        assert!((control.replan_rate - 0.5).abs() < 1e-9);
        assert!((control.rollback_rate - 0.5).abs() < 1e-9);
        assert!(control.confidence_score > 0.0);
    }

    #[test]
    fn test_z_score_sign() {
        let comparison = CohortComparison {
            control: CanaryMetrics {
                success_rate: 0.9,
                sample_size: 100,
                ..CanaryMetrics::default()
            },
            experimental: CanaryMetrics {
                success_rate: 0.6,
                sample_size: 100,
                ..CanaryMetrics::default()
            },
        };
        assert!(comparison.success_z_score() < -1.96);
        assert!((comparison.success_delta() + 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_z_score() {
        let all_success = CanaryMetrics {
            success_rate: 1.0,
            sample_size: 40,
            ..CanaryMetrics::default()
        };
        let comparison = CohortComparison {
            control: all_success,
            experimental: all_success,
        };
        assert!(comparison.success_z_score().abs() < f64::EPSILON);
        assert!(CohortComparison::default().success_z_score().abs() < f64::EPSILON);
    }

    #[test]
    fn test_relative_increase() {
        let comparison = CohortComparison {
            control: CanaryMetrics {
                avg_cost: 2.0,
                avg_duration: 100.0,
                ..CanaryMetrics::default()
            },
            experimental: CanaryMetrics {
                avg_cost: 3.0,
                avg_duration: 90.0,
                ..CanaryMetrics::default()
            },
        };
        assert!((comparison.cost_increase() - 0.5).abs() < 1e-9);
        assert!((comparison.duration_increase() + 0.1).abs() < 1e-9);
    }
}
