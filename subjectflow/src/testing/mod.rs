//! Testing utilities for subjectflow pipelines.
//!
//! This module provides:
//! - A scripted invoker and a recording output sink
//! - Graph and input fixtures
//! - Assertions over run reports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_cached, assert_done, assert_failed, assert_skipped};
pub use fixtures::{domain, subject_inputs, two_stage_with_join, PipelineFixture};
pub use mocks::{RecordedCall, RecordingSink, ScriptedInvoker};
