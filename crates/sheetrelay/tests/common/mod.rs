//! Shared test utilities for sheetrelay integration tests.
//!
//! This module provides:
//! - `TestHarness` with an isolated data directory, job store and fake relay
//! - Builders for spreadsheets, registries and raw email messages

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{FakeMailbox, RecordingRelay, TestHarness};
