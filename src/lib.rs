//! # SafeCopy - Verified File Synchronization
//!
//! SafeCopy copies one or more source trees to a destination and makes sure
//! every copied file is correct before calling the pass a success.
//!
//! ## Features
//!
//! - **Full or Quick Comparison**: Byte-for-byte by default, size and mtime with `quick`
//! - **Deterministic Walks**: Sorted depth-first order, symlinks never followed
//! - **Exclusions**: Plain prefixes, globs and absolute paths
//! - **Retry with Backoff**: Flaky media get bounded, doubling delays
//! - **Post-copy Verification**: Any mismatch aborts the pass
//! - **Mirroring**: Optional deletion of destination entries no source provides
//! - **Delta Transfer**: Rebuild changed files from blocks already at the destination
//! - **Per-entry Report**: Text or JSON, with a nonzero exit on any failure
//!
//! ## Quick Start
//!
//! ```no_run
//! use safecopy::config::SyncOptions;
//! use safecopy::core::SyncEngine;
//! use std::path::{Path, PathBuf};
//!
//! let engine = SyncEngine::new(SyncOptions::default());
//! let report = engine
//!     .execute(&[PathBuf::from("/home/me/docs")], Path::new("/mnt/backup"))
//!     .unwrap();
//!
//! report.print_summary();
//! std::process::exit(report.exit_code());
//! ```
//!
//! ## Mirroring with Verification
//!
//! ```no_run
//! use safecopy::prelude::*;
//! use std::path::{Path, PathBuf};
//!
//! let options = SyncOptions {
//!     quick: true,
//!     delete: true,
//!     verify: true,
//!     retries: 3,
//!     exclude: vec!["docs/tmp".to_string(), "*.swp".to_string()],
//!     ..Default::default()
//! };
//!
//! let report = SyncEngine::new(options)
//!     .execute(&[PathBuf::from("docs")], Path::new("/mnt/mirror"))
//!     .unwrap();
//!
//! for failure in report.failures() {
//!     eprintln!("{}: {}", failure.path.display(), failure.status);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod hash;
pub mod sync;

// Re-export commonly used types
pub use config::{SyncOptions, TransferKind};
pub use core::{Outcome, OutcomeStatus, SyncEngine, SyncReport};
pub use error::{Result, SafeCopyError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use safecopy::prelude::*;
    //! ```

    pub use crate::config::{SyncOptions, TransferKind};
    pub use crate::core::{run_self_test, Outcome, OutcomeStatus, SyncEngine, SyncReport};
    pub use crate::error::{Result, SafeCopyError};
    pub use crate::fs::{walk, EntryKind, ExclusionSet, SyncEntry, TransferStrategy};
    pub use crate::hash::contents_equal;
    pub use crate::sync::{classify, verify, Action, DeltaCopy, RetryPolicy};
}
