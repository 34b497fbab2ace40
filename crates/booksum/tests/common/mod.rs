//! Shared test utilities for booksum integration tests.
//!
//! - `TestHarness` wires a pipeline over in-memory stores, an in-process
//!   queue and a scripted AI service
//! - builders create paged text books and TOC answers

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{fast_retry, FakeAi, StatusWriteFaults, TestHarness};
