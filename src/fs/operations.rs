//! Filesystem mutations shared by the copier, deleter and engine
//!
//! Every function here takes the destination path explicitly; nothing reads
//! global state.

use crate::error::{IoResultExt, Result, SafeCopyError};
use crate::fs::SETID_MASK;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Build a unique temporary sibling path for `dest`
///
/// Transfers write here and rename into place, so a failed attempt never
/// leaves a truncated file at `dest`.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    dest.with_file_name(format!(".{}.safecopy-{}-{}.tmp", name, std::process::id(), seq))
}

/// Copy permission bits and access/modification times from `source` to `dest`
///
/// setuid and setgid are never carried over. Symlinks only get their own
/// timestamps; their permissions are not settable portably.
pub fn copy_metadata(source: &Path, dest: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(source).with_path(source)?;
    let is_symlink = metadata.file_type().is_symlink();

    if !is_symlink {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode() & 0o7777 & !SETID_MASK;
            std::fs::set_permissions(dest, std::fs::Permissions::from_mode(mode))
                .with_path(dest)?;
        }

        #[cfg(not(unix))]
        {
            std::fs::set_permissions(dest, metadata.permissions()).with_path(dest)?;
        }
    }

    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    let atime = filetime::FileTime::from_last_access_time(&metadata);

    if is_symlink {
        filetime::set_symlink_file_times(dest, atime, mtime).with_path(dest)?;
    } else {
        filetime::set_file_times(dest, atime, mtime).with_path(dest)?;
    }

    Ok(())
}

/// Recreate a symlink at `dest` pointing at `target`
pub fn create_symlink(target: &Path, dest: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, dest).with_path(dest)
    }

    #[cfg(windows)]
    {
        if target.is_dir() {
            std::os::windows::fs::symlink_dir(target, dest).with_path(dest)
        } else {
            std::os::windows::fs::symlink_file(target, dest).with_path(dest)
        }
    }
}

/// Give the owner write and search permission on a directory
///
/// Returns `true` if the mode had to change. Anything that is not a
/// directory is left alone.
pub fn make_owner_writable(path: &Path) -> Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::symlink_metadata(path).with_path(path)?;
        let mode = metadata.permissions().mode() & 0o7777;
        if !metadata.is_dir() || mode & 0o300 == 0o300 {
            return Ok(false);
        }
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o300)).with_path(path)?;
        Ok(true)
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(false)
    }
}

/// Remove a file, symlink or whole directory tree
///
/// Symlinks to directories are removed as links, never followed. Read-only
/// directories in the way (the parent, or any inside the tree) are made
/// writable first.
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(path).with_path(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        make_owner_writable(parent)?;
    }

    if metadata.is_dir() {
        for entry in walkdir::WalkDir::new(path).follow_links(false) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                make_owner_writable(entry.path())?;
            }
        }
        std::fs::remove_dir_all(path).with_path(path)?;
    } else {
        std::fs::remove_file(path).with_path(path)?;
    }
    Ok(())
}

/// Check if something (including a dangling symlink) exists at `path`
pub fn path_exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Make `path` absolute without resolving symlinks in the final component
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(SafeCopyError::config("Empty path"));
    }
    std::path::absolute(path).with_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_temp_paths_are_unique_siblings() {
        let dest = Path::new("/backup/docs/a.txt");
        let first = temp_path_for(dest);
        let second = temp_path_for(dest);

        assert_ne!(first, second);
        assert_eq!(first.parent(), dest.parent());
        assert!(first.file_name().unwrap().to_string_lossy().starts_with(".a.txt."));
    }

    #[test]
    fn test_copy_metadata_times() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        File::create(&src).unwrap().write_all(b"data").unwrap();
        File::create(&dst).unwrap().write_all(b"data").unwrap();

        let old = filetime::FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&src, old).unwrap();

        copy_metadata(&src, &dst).unwrap();

        let dst_meta = std::fs::metadata(&dst).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&dst_meta), old);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_metadata_masks_setid() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("tool");
        let dst = dir.path().join("tool.copy");
        File::create(&src).unwrap();
        File::create(&dst).unwrap();
        std::fs::set_permissions(&src, std::fs::Permissions::from_mode(0o4755)).unwrap();

        copy_metadata(&src, &dst).unwrap();

        let mode = std::fs::metadata(&dst).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn test_remove_path() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir_all(sub.join("inner")).unwrap();
        File::create(sub.join("inner/f.txt")).unwrap();
        let file = dir.path().join("f.txt");
        File::create(&file).unwrap();

        remove_path(&sub).unwrap();
        remove_path(&file).unwrap();

        assert!(!path_exists(&sub));
        assert!(!path_exists(&file));
        assert!(remove_path(&file).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_make_owner_writable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        assert!(make_owner_writable(&locked).unwrap());
        assert!(!make_owner_writable(&locked).unwrap());
        let mode = std::fs::metadata(&locked).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o755);

        let file = dir.path().join("f.txt");
        File::create(&file).unwrap();
        assert!(!make_owner_writable(&file).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_inside_read_only_directories() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("ro");
        let tree = parent.join("tree");
        std::fs::create_dir_all(tree.join("inner")).unwrap();
        File::create(tree.join("inner/f.txt")).unwrap();
        File::create(parent.join("loose.txt")).unwrap();
        for locked in [tree.join("inner"), tree.clone(), parent.clone()] {
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();
        }

        remove_path(&parent.join("loose.txt")).unwrap();
        remove_path(&tree).unwrap();

        assert!(!path_exists(&tree));
        assert!(!path_exists(&parent.join("loose.txt")));
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_symlink_does_not_follow() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir(&target).unwrap();
        File::create(target.join("keep.txt")).unwrap();
        let link = dir.path().join("link");
        create_symlink(&target, &link).unwrap();

        remove_path(&link).unwrap();

        assert!(!path_exists(&link));
        assert!(target.join("keep.txt").exists());
    }
}
