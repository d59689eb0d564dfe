//! Per-entry synchronization steps
//!
//! - Comparison of a source entry against its destination
//! - Copy with retry and backoff
//! - Post-copy verification
//! - Removal of extraneous destination entries
//! - Delta transfer against an existing destination file

mod compare;
mod copier;
mod delete;
mod delta;
mod verify;

pub use compare::*;
pub use copier::*;
pub use delete::*;
pub use delta::*;
pub use verify::*;
