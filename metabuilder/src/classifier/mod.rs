//! Failure classification.
//!
//! This module provides:
//! - The failure taxonomy and its recovery policy
//! - A weighted pattern table
//! - The classifier with its consecutive-unknown overlay and backoff extraction

mod engine;
mod patterns;
mod signal;

pub use engine::{ClassifierConfig, FailureClassifier};
pub use patterns::{Matcher, Pattern, PatternMatch, PatternTable};
pub use signal::{BackoffInfo, Evidence, FailureSignal, FailureType, Severity};
