//! Post-copy verification
//!
//! Any I/O error while checking counts as a mismatch: a destination that
//! cannot be read back is not a verified copy.

use crate::error::{Result, SafeCopyError};
use crate::fs::{EntryKind, SyncEntry};
use crate::hash::{contents_equal, ContentComparison};
use std::path::Path;

/// Outcome of verifying one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Destination matches the source
    Match,
    /// Destination differs, with the reason
    Mismatch(String),
}

impl Verification {
    /// Check if the destination matched
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }

    /// Convert a mismatch into a `VerifyMismatch` error for `path`
    pub fn into_result(self, path: &Path) -> Result<()> {
        match self {
            Self::Match => Ok(()),
            Self::Mismatch(reason) => Err(SafeCopyError::verify_mismatch(path, reason)),
        }
    }
}

fn kind_name(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::File => "file",
        EntryKind::Directory => "directory",
        EntryKind::Symlink => "symlink",
        EntryKind::Other => "special file",
    }
}

/// Verify `dest` against the source `entry`
///
/// Quick mode checks kind, size and modification time. Full mode compares
/// every byte.
pub fn verify(entry: &SyncEntry, dest: &Path, quick: bool, buffer_size: usize) -> Verification {
    let dest_meta = match std::fs::symlink_metadata(dest) {
        Ok(meta) => meta,
        Err(e) => return Verification::Mismatch(format!("destination unreadable: {}", e)),
    };

    let dest_kind = EntryKind::from_metadata(&dest_meta);
    if dest_kind != entry.kind {
        return Verification::Mismatch(format!(
            "expected {}, found {}",
            kind_name(entry.kind),
            kind_name(dest_kind)
        ));
    }

    match entry.kind {
        EntryKind::Directory | EntryKind::Other => Verification::Match,
        EntryKind::Symlink => match std::fs::read_link(dest) {
            Ok(target) if entry.symlink_target.as_deref() == Some(target.as_path()) => {
                Verification::Match
            }
            Ok(target) => Verification::Mismatch(format!("link points to {}", target.display())),
            Err(e) => Verification::Mismatch(format!("link unreadable: {}", e)),
        },
        EntryKind::File => {
            if dest_meta.len() != entry.size {
                return Verification::Mismatch(format!(
                    "size {} does not match source size {}",
                    dest_meta.len(),
                    entry.size
                ));
            }

            if quick {
                return if dest_meta.modified().ok() == Some(entry.modified) {
                    Verification::Match
                } else {
                    Verification::Mismatch("modified time differs".to_string())
                };
            }

            match contents_equal(&entry.path, dest, buffer_size) {
                Ok(ContentComparison::Equal) => Verification::Match,
                Ok(ContentComparison::Differs { offset }) => {
                    Verification::Mismatch(format!("content differs at byte {}", offset))
                }
                Err(e) => Verification::Mismatch(format!("read failed: {}", e)),
            }
        }
    }
}
