//! File system module
//!
//! Exclusion matching, deterministic tree walking, metadata operations and
//! the byte transfer strategies used by the copier.

mod matcher;
mod operations;
mod transfer;
mod walker;

pub use matcher::*;
pub use operations::*;
pub use transfer::*;
pub use walker::*;
