//! Logging setup and span helpers.

mod logging;
mod tracing;

pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingError};
pub use tracing::{RunSpanAttributes, SpanTimer, StepSpanAttributes};
