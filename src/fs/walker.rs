//! Deterministic tree walking
//!
//! Depth-first pre-order, sorted by file name within each directory, so two
//! walks over an unchanged tree yield the same sequence. Excluded paths are
//! never yielded or descended into. Symlinks are reported as themselves and
//! never followed.

use crate::error::{Result, SafeCopyError};
use crate::fs::ExclusionSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// setuid | setgid
pub const SETID_MASK: u32 = 0o6000;

/// Kind of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link (never followed)
    Symlink,
    /// Fifo, socket or device
    Other,
}

impl EntryKind {
    /// Classify from `lstat` metadata
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }
}

/// One entry of a synchronization pass
#[derive(Debug, Clone)]
pub struct SyncEntry {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path relative to the walk base; identity of the entry within a pass
    pub relative_path: PathBuf,
    /// Entry kind
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time
    pub modified: SystemTime,
    /// Permission bits including setuid/setgid
    pub mode: u32,
    /// Link target for symlinks
    pub symlink_target: Option<PathBuf>,
}

impl SyncEntry {
    /// Build an entry from a path without following symlinks
    pub fn from_path(path: &Path, relative_path: &Path) -> Result<Self> {
        let metadata = std::fs::symlink_metadata(path).map_err(|e| SafeCopyError::io(path, e))?;
        Ok(Self::from_metadata(path, relative_path, &metadata))
    }

    /// Build an entry from already-fetched `lstat` metadata
    pub fn from_metadata(path: &Path, relative_path: &Path, metadata: &Metadata) -> Self {
        let kind = EntryKind::from_metadata(metadata);

        let symlink_target = if kind == EntryKind::Symlink {
            std::fs::read_link(path).ok()
        } else {
            None
        };

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode()
        };

        #[cfg(not(unix))]
        let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };

        Self {
            path: path.to_path_buf(),
            relative_path: relative_path.to_path_buf(),
            kind,
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            mode,
            symlink_target,
        }
    }

    /// Check if setuid or setgid is set
    pub fn has_setid_bits(&self) -> bool {
        self.mode & SETID_MASK != 0
    }

    /// Check if this is a directory
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Check if this is a regular file
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Lazy walk over one root
pub struct Walk<'a> {
    inner: walkdir::IntoIter,
    base: PathBuf,
    exclusions: &'a ExclusionSet,
    failed: bool,
}

impl<'a> Walk<'a> {
    fn new(root: &Path, base: PathBuf, exclusions: &'a ExclusionSet, contents_only: bool) -> Self {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .follow_root_links(false)
            .sort_by_file_name()
            .min_depth(if contents_only { 1 } else { 0 });

        Self {
            inner: walker.into_iter(),
            base,
            exclusions,
            failed: false,
        }
    }

    /// Do not descend into the directory yielded last
    pub fn skip_current_dir(&mut self) {
        self.inner.skip_current_dir();
    }
}

impl Iterator for Walk<'_> {
    type Item = Result<SyncEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    // An unreadable path ends this root's walk
                    self.failed = true;
                    return Some(Err(err.into()));
                }
            };

            let relative = match entry.path().strip_prefix(&self.base) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => entry.path().to_path_buf(),
            };

            if self.exclusions.is_excluded(&relative) {
                tracing::debug!(path = %relative.display(), "excluded");
                if entry.file_type().is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err.into()));
                }
            };

            return Some(Ok(SyncEntry::from_metadata(entry.path(), &relative, &metadata)));
        }
    }
}

/// Walk `root` and everything below it
///
/// Relative paths start with the root's own name (`docs`, `docs/a.txt`).
pub fn walk<'a>(root: &Path, exclusions: &'a ExclusionSet) -> Walk<'a> {
    let base = root
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());
    Walk::new(root, base, exclusions, false)
}

/// Walk everything below `dir`, with paths relative to `dir` itself
pub fn walk_contents<'a>(dir: &Path, exclusions: &'a ExclusionSet) -> Walk<'a> {
    Walk::new(dir, dir.to_path_buf(), exclusions, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("docs");

        std::fs::create_dir_all(root.join("b_dir/nested")).unwrap();
        std::fs::create_dir_all(root.join("cache")).unwrap();
        File::create(root.join("a.txt")).unwrap().write_all(b"alpha").unwrap();
        File::create(root.join("c.txt")).unwrap().write_all(b"gamma").unwrap();
        File::create(root.join("b_dir/nested/deep.txt")).unwrap().write_all(b"deep").unwrap();
        File::create(root.join("cache/blob.bin")).unwrap().write_all(&[0u8; 64]).unwrap();

        dir
    }

    fn relative_paths(walk: Walk<'_>) -> Vec<String> {
        walk.map(|e| e.unwrap().relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_walk_is_sorted_preorder() {
        let dir = create_test_dir();
        let excludes = ExclusionSet::new();

        let paths = relative_paths(walk(&dir.path().join("docs"), &excludes));

        assert_eq!(
            paths,
            vec![
                "docs",
                "docs/a.txt",
                "docs/b_dir",
                "docs/b_dir/nested",
                "docs/b_dir/nested/deep.txt",
                "docs/c.txt",
                "docs/cache",
                "docs/cache/blob.bin",
            ]
        );
    }

    #[test]
    fn test_walk_is_repeatable() {
        let dir = create_test_dir();
        let excludes = ExclusionSet::new();
        let root = dir.path().join("docs");

        let first = relative_paths(walk(&root, &excludes));
        let second = relative_paths(walk(&root, &excludes));
        assert_eq!(first, second);
    }

    #[test]
    fn test_excluded_directory_is_not_descended() {
        let dir = create_test_dir();
        let excludes = ExclusionSet::from_patterns(&["docs/cache", "deep.txt"]).unwrap();

        let paths = relative_paths(walk(&dir.path().join("docs"), &excludes));

        assert!(!paths.iter().any(|p| p.starts_with("docs/cache")));
        assert!(!paths.iter().any(|p| p.ends_with("deep.txt")));
        assert!(paths.contains(&"docs/b_dir/nested".to_string()));
    }

    #[test]
    fn test_walk_contents_is_relative_to_dir() {
        let dir = create_test_dir();
        let excludes = ExclusionSet::new();

        let paths = relative_paths(walk_contents(&dir.path().join("docs"), &excludes));
        assert_eq!(paths[0], "a.txt");
        assert!(!paths.contains(&String::new()));
        assert!(paths.contains(&"b_dir/nested/deep.txt".to_string()));
    }

    #[test]
    fn test_entry_metadata() {
        let dir = create_test_dir();
        let excludes = ExclusionSet::new();

        let entries: Vec<SyncEntry> = walk(&dir.path().join("docs"), &excludes)
            .map(|e| e.unwrap())
            .collect();

        let root = &entries[0];
        assert!(root.is_dir());
        assert_eq!(root.size, 0);

        let file = entries.iter().find(|e| e.relative_path.ends_with("a.txt")).unwrap();
        assert!(file.is_file());
        assert_eq!(file.size, 5);
        assert!(!file.has_setid_bits());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed() {
        let dir = create_test_dir();
        let root = dir.path().join("docs");
        // Cycle back to the root
        std::os::unix::fs::symlink(&root, root.join("loop")).unwrap();

        let excludes = ExclusionSet::new();
        let entries: Vec<SyncEntry> = walk(&root, &excludes).map(|e| e.unwrap()).collect();

        let link = entries.iter().find(|e| e.relative_path.ends_with("loop")).unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.symlink_target.as_deref(), Some(root.as_path()));
        assert!(!entries.iter().any(|e| e.relative_path.starts_with("docs/loop/")));
    }

    #[cfg(unix)]
    #[test]
    fn test_setid_bits_detected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = create_test_dir();
        let root = dir.path().join("docs");
        std::fs::set_permissions(root.join("a.txt"), std::fs::Permissions::from_mode(0o4755)).unwrap();

        let entry = SyncEntry::from_path(&root.join("a.txt"), Path::new("docs/a.txt")).unwrap();
        assert!(entry.has_setid_bits());
        assert_eq!(entry.mode & SETID_MASK, 0o4000);
    }

    #[test]
    fn test_missing_root_is_traversal_error() {
        let dir = TempDir::new().unwrap();
        let excludes = ExclusionSet::new();

        let mut walker = walk(&dir.path().join("missing"), &excludes);
        assert!(matches!(walker.next(), Some(Err(SafeCopyError::Traversal { .. }))));
        assert!(walker.next().is_none());
    }
}
