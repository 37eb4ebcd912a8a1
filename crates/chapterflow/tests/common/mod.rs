//! Shared test utilities for chapterflow integration tests.
//!
//! - `TestHarness` wires a runner to an in-memory database and a temp data dir
//! - `ArchiveBuilder` builds upload archives in memory
//! - `ScriptedTransform` lets a test decide which pages fail and how long pages take

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{HarnessOptions, ScriptedTransform, TestHarness};
