//! Content integrity module
//!
//! Provides the streaming byte-for-byte comparison used by full-mode
//! comparison and verification.

mod integrity;

pub use integrity::*;
