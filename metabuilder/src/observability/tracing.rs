//! Span attributes for runs and steps, and a duration helper.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::canary::Cohort;

/// Attributes attached to a run's tracing span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpanAttributes {
    /// Run id.
    pub run_id: Uuid,
    /// Tenant id.
    pub tenant_id: String,
    /// Pinned pipeline version.
    pub cohort: Cohort,
}

impl RunSpanAttributes {
    /// Creates run attributes.
    #[must_use]
    pub fn new(run_id: Uuid, tenant_id: impl Into<String>, cohort: Cohort) -> Self {
        Self {
            run_id,
            tenant_id: tenant_id.into(),
            cohort,
        }
    }

    /// Creates the `tracing` span every log line of the run is nested in.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "run",
            run_id = %self.run_id,
            tenant_id = %self.tenant_id,
            cohort = %self.cohort,
        )
    }

    /// Converts to OpenTelemetry-style attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("run.id".to_string(), self.run_id.to_string());
        attrs.insert("run.tenant_id".to_string(), self.tenant_id.clone());
        attrs.insert("run.cohort".to_string(), self.cohort.to_string());
        attrs
    }
}

/// Attributes of one step attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSpanAttributes {
    /// Step id.
    pub step_id: String,
    /// Iteration.
    pub iteration: u32,
    /// Retry attempt.
    pub attempt: u32,
    /// Outcome, once known.
    pub status: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
}

impl StepSpanAttributes {
    /// Creates step attributes.
    #[must_use]
    pub fn new(step_id: impl Into<String>, iteration: u32, attempt: u32) -> Self {
        Self {
            step_id: step_id.into(),
            iteration,
            attempt,
            ..Default::default()
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Converts to OpenTelemetry-style attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("step.id".to_string(), self.step_id.clone());
        attrs.insert("step.iteration".to_string(), self.iteration.to_string());
        attrs.insert("step.attempt".to_string(), self.attempt.to_string());
        if let Some(ref v) = self.status {
            attrs.insert("step.status".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("step.duration_ms".to_string(), v.to_string());
        }
        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// The span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
