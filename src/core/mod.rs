//! Core synchronization engine
//!
//! Provides the pass orchestration, the outcome report, the bounded
//! worker pool for file jobs, and the built-in self-test.

mod engine;
mod report;
mod scheduler;
mod selftest;

pub use engine::*;
pub use report::*;
pub use scheduler::*;
pub use selftest::*;
