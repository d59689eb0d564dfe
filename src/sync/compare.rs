//! Decide what a source entry needs at its destination
//!
//! | destination                  | quick | full                 |
//! |------------------------------|-------|----------------------|
//! | absent                       | copy  | copy                 |
//! | size or mtime differ         | copy  | copy                 |
//! | size and mtime equal         | skip  | skip if bytes equal  |
//!
//! A destination of a different kind is replaced. Directories that already
//! exist are never compared further.

use crate::config::SyncOptions;
use crate::error::{Result, SafeCopyError};
use crate::fs::{EntryKind, SyncEntry};
use crate::hash::{contents_equal, ContentComparison};
use std::fmt;
use std::path::Path;

/// Why an existing destination needs updating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difference {
    /// Sizes differ
    Size,
    /// Modification times differ
    ModifiedTime,
    /// Bytes differ at this offset
    Content(u64),
    /// Symlink points elsewhere
    LinkTarget,
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size => write!(f, "size differs"),
            Self::ModifiedTime => write!(f, "modified time differs"),
            Self::Content(offset) => write!(f, "content differs at byte {}", offset),
            Self::LinkTarget => write!(f, "link target differs"),
        }
    }
}

/// Required action for one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Destination is absent
    Create,
    /// Same kind, but out of date
    Update(Difference),
    /// Destination is a different kind; remove it, then copy
    Replace,
    /// Destination is up to date (or the entry cannot be copied)
    Skip,
}

impl Action {
    /// Check if this action writes to the destination
    pub fn needs_copy(&self) -> bool {
        !matches!(self, Self::Skip)
    }
}

/// Classify `entry` against whatever is at `dest`
pub fn classify(entry: &SyncEntry, dest: &Path, options: &SyncOptions) -> Result<Action> {
    if entry.kind == EntryKind::Other {
        tracing::debug!(path = %entry.relative_path.display(), "special file, not copied");
        return Ok(Action::Skip);
    }

    let dest_meta = match std::fs::symlink_metadata(dest) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Action::Create),
        Err(e) => return Err(SafeCopyError::io(dest, e)),
    };

    if EntryKind::from_metadata(&dest_meta) != entry.kind {
        return Ok(Action::Replace);
    }

    let action = match entry.kind {
        EntryKind::Directory | EntryKind::Other => Action::Skip,
        EntryKind::Symlink => {
            let target = std::fs::read_link(dest).map_err(|e| SafeCopyError::io(dest, e))?;
            if entry.symlink_target.as_deref() == Some(target.as_path()) {
                Action::Skip
            } else {
                Action::Update(Difference::LinkTarget)
            }
        }
        EntryKind::File => {
            if dest_meta.len() != entry.size {
                Action::Update(Difference::Size)
            } else if dest_meta.modified().ok() != Some(entry.modified) {
                Action::Update(Difference::ModifiedTime)
            } else if options.quick {
                Action::Skip
            } else {
                match contents_equal(&entry.path, dest, options.buffer_size)? {
                    ContentComparison::Equal => Action::Skip,
                    ContentComparison::Differs { offset } => {
                        Action::Update(Difference::Content(offset))
                    }
                }
            }
        }
    };

    if let Action::Update(diff) = action {
        tracing::debug!(path = %entry.relative_path.display(), reason = %diff, "out of date");
    }

    Ok(action)
}
