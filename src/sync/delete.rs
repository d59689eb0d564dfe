//! Removal of extraneous destination entries
//!
//! Runs once, before anything is copied. The set of wanted paths comes from
//! walking every source root; if any source cannot be walked completely,
//! nothing is deleted.

use crate::core::{Outcome, OutcomeStatus};
use crate::fs::{remove_path, walk, walk_contents, ExclusionSet};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Deletes destination entries that no source provides
#[derive(Debug, Clone)]
pub struct Deleter<'a> {
    exclusions: &'a ExclusionSet,
    dry_run: bool,
    stop_on_failure: bool,
}

impl<'a> Deleter<'a> {
    /// Create a deleter that continues past failed removals
    pub fn new(exclusions: &'a ExclusionSet, dry_run: bool) -> Self {
        Self {
            exclusions,
            dry_run,
            stop_on_failure: false,
        }
    }

    /// Stop at the first failed removal
    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    /// Collect the relative paths every source provides
    fn wanted_paths(&self, source_roots: &[PathBuf]) -> Result<HashSet<PathBuf>, Outcome> {
        let mut wanted = HashSet::new();

        for root in source_roots {
            for entry in walk(root, self.exclusions) {
                match entry {
                    Ok(entry) => {
                        wanted.insert(entry.relative_path);
                    }
                    Err(e) => {
                        let path = e.path().cloned().unwrap_or_else(|| root.clone());
                        return Err(Outcome::failed(
                            path,
                            crate::fs::EntryKind::Other,
                            OutcomeStatus::TraversalFailed,
                            format!("{}; nothing deleted", e),
                        ));
                    }
                }
            }
        }

        Ok(wanted)
    }

    /// Remove everything under `dest_root` absent from all `source_roots`
    pub fn run(&self, dest_root: &Path, source_roots: &[PathBuf]) -> Vec<Outcome> {
        let wanted = match self.wanted_paths(source_roots) {
            Ok(wanted) => wanted,
            Err(outcome) => return vec![outcome],
        };

        let mut outcomes = Vec::new();
        let mut entries = walk_contents(dest_root, self.exclusions);

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().cloned().unwrap_or_else(|| dest_root.to_path_buf());
                    outcomes.push(Outcome::failed(
                        path,
                        crate::fs::EntryKind::Other,
                        OutcomeStatus::TraversalFailed,
                        e,
                    ));
                    break;
                }
            };

            if wanted.contains(&entry.relative_path) {
                continue;
            }

            // Removed (or reported) as a whole
            if entry.is_dir() {
                entries.skip_current_dir();
            }

            if self.dry_run {
                outcomes.push(Outcome::new(&entry.relative_path, entry.kind, OutcomeStatus::WouldDelete));
                continue;
            }

            match remove_path(&entry.path) {
                Ok(()) => {
                    outcomes.push(Outcome::new(&entry.relative_path, entry.kind, OutcomeStatus::Deleted));
                }
                Err(e) => {
                    outcomes.push(Outcome::failed(
                        &entry.relative_path,
                        entry.kind,
                        OutcomeStatus::DeleteFailed,
                        e,
                    ));
                    if self.stop_on_failure {
                        break;
                    }
                }
            }
        }

        outcomes
    }
}

/// Remove destination entries absent from every source
pub fn delete_extraneous(
    dest_root: &Path,
    source_roots: &[PathBuf],
    exclusions: &ExclusionSet,
    dry_run: bool,
) -> Vec<Outcome> {
    Deleter::new(exclusions, dry_run).run(dest_root, source_roots)
}
