//! Testing utilities for agent-driven runs.
//!
//! This module provides:
//! - Scripted and canned agents
//! - Fixtures that wire a pool, executor and orchestrator for tests

mod fixtures;
mod mocks;

pub use fixtures::{echo_registry, fast_pool_config, TestHarness};
pub use mocks::{EchoAgent, FailingAgent, RecordedCall, ScriptedAgent, SlowAgent};
