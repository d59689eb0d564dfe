//! Configuration module for SafeCopy
//!
//! Provides CLI arguments and the per-pass `SyncOptions`.

mod settings;

pub use settings::*;
