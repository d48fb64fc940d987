//! Test doubles for pipelines.
//!
//! - [`ScriptedProvider`] replays queued replies and records every transcript.
//! - [`CountingNode`] returns a fixed output and counts invocations.
//! - [`FailingNode`] fails a set number of times before succeeding, or
//!   forever.

mod mocks;

pub use mocks::{CountingNode, FailingNode, ScriptedProvider};
