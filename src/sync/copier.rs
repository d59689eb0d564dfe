//! Single-entry copy with retry
//!
//! Every attempt starts from scratch: a replaced destination is removed again,
//! and the transfer strategy always writes a fresh temporary file. The first
//! successful attempt ends the loop.

use crate::config::SyncOptions;
use crate::error::{IoResultExt, Result, SafeCopyError};
use crate::fs::{copy_metadata, create_symlink, path_exists, remove_path, EntryKind, SyncEntry, TransferStrategy};
use crate::sync::Action;
use std::path::Path;
use std::time::Duration;

/// Retry schedule for failed copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Upper bound for a single backoff sleep
    pub const MAX_DELAY: Duration = Duration::from_secs(30);

    /// Create a policy
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self { retries, base_delay }
    }

    /// Build the policy for a pass
    pub fn from_options(options: &SyncOptions) -> Self {
        Self::new(options.retries, options.retry_delay)
    }

    /// Total attempts, including the first
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Sleep before retry `n` (1-based): `base * 2^(n-1)`, capped
    pub fn delay_for_retry(&self, n: u32) -> Duration {
        let factor = 2u32.checked_pow(n.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Self::MAX_DELAY)
            .min(Self::MAX_DELAY)
    }
}

/// Successful copy of one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Copied {
    /// Bytes written
    pub bytes: u64,
    /// Attempts used
    pub attempts: u32,
}

/// Copy one entry to `dest`, retrying per `policy`
///
/// Directories are only created here; their metadata is applied by the
/// engine once their contents are done. Errors that are not
/// [recoverable](SafeCopyError::is_recoverable) are not retried.
pub fn copy_entry(
    entry: &SyncEntry,
    dest: &Path,
    action: Action,
    strategy: &dyn TransferStrategy,
    policy: &RetryPolicy,
    nowarn: bool,
) -> Result<Copied> {
    if entry.has_setid_bits() && !nowarn {
        tracing::warn!(
            path = %entry.path.display(),
            mode = %format!("{:o}", entry.mode & 0o7777),
            "setuid/setgid bit set; not carried over to the copy"
        );
    }

    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match copy_once(entry, dest, action, strategy) {
            Ok(bytes) => {
                tracing::debug!(
                    path = %entry.relative_path.display(),
                    bytes,
                    attempt,
                    strategy = strategy.name(),
                    "copied"
                );
                return Ok(Copied { bytes, attempts: attempt });
            }
            Err(e) if attempt >= max_attempts || !e.is_recoverable() => {
                return Err(SafeCopyError::CopyFailure {
                    path: entry.relative_path.clone(),
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.delay_for_retry(attempt);
                tracing::warn!(
                    path = %entry.relative_path.display(),
                    attempt,
                    max_attempts,
                    error = %e,
                    "copy failed, retrying in {:?}",
                    delay
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

fn copy_once(
    entry: &SyncEntry,
    dest: &Path,
    action: Action,
    strategy: &dyn TransferStrategy,
) -> Result<u64> {
    if action == Action::Replace && path_exists(dest) {
        remove_path(dest)?;
    }

    match entry.kind {
        EntryKind::Directory => {
            if !dest.is_dir() {
                std::fs::create_dir(dest).with_path(dest)?;
            }
            Ok(0)
        }
        EntryKind::Symlink => {
            let target = entry.symlink_target.as_deref().ok_or_else(|| SafeCopyError::Transfer {
                path: entry.path.clone(),
                message: "unreadable symlink target".to_string(),
            })?;
            if path_exists(dest) {
                remove_path(dest)?;
            }
            create_symlink(target, dest)?;
            copy_metadata(&entry.path, dest)?;
            Ok(0)
        }
        EntryKind::File => {
            let stats = strategy.transfer(&entry.path, dest)?;
            copy_metadata(&entry.path, dest)?;
            Ok(stats.bytes_copied)
        }
        EntryKind::Other => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{StreamCopy, TransferStats};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Counts WARN events
    #[derive(Clone, Default)]
    struct WarningCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarningCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_warnings(f: impl FnOnce()) -> usize {
        let counter = WarningCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        tracing::subscriber::with_default(subscriber, f);
        counter.0.load(Ordering::SeqCst)
    }

    /// Always fails with an error that retrying cannot fix
    struct MisconfiguredStrategy {
        calls: AtomicU32,
    }

    impl TransferStrategy for MisconfiguredStrategy {
        fn name(&self) -> &'static str {
            "misconfigured"
        }

        fn transfer(&self, _source: &Path, _dest: &Path) -> Result<TransferStats> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SafeCopyError::config("no usable transfer method"))
        }
    }

    /// Fails the first `failures` calls, then delegates to a stream copy
    struct FlakyStrategy {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStrategy {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl TransferStrategy for FlakyStrategy {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn transfer(&self, source: &Path, dest: &Path) -> Result<TransferStats> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(SafeCopyError::io(
                    dest,
                    std::io::Error::new(std::io::ErrorKind::Other, "flaky media"),
                ));
            }
            StreamCopy::default().transfer(source, dest)
        }
    }

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy::new(retries, Duration::from_millis(1))
    }

    fn source_file(dir: &TempDir, data: &[u8]) -> SyncEntry {
        let path = dir.path().join("1.txt");
        std::fs::write(&path, data).unwrap();
        SyncEntry::from_path(&path, Path::new("a/1.txt")).unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));

        assert_eq!(policy.max_attempts(), 11);
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(20), RetryPolicy::MAX_DELAY);
        assert_eq!(policy.delay_for_retry(u32::MAX), RetryPolicy::MAX_DELAY);
    }

    #[test]
    fn test_retry_exhaustion_counts_attempts() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let entry = source_file(&src, b"A");
        let strategy = FlakyStrategy::new(u32::MAX);

        let err = copy_entry(&entry, &dst.path().join("1.txt"), Action::Create, &strategy, &fast_policy(3), true)
            .unwrap_err();

        assert_eq!(strategy.calls.load(Ordering::SeqCst), 4);
        match err {
            SafeCopyError::CopyFailure { attempts, path, .. } => {
                assert_eq!(attempts, 4);
                assert_eq!(path, Path::new("a/1.txt"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dst.path().join("1.txt").exists());
    }

    #[test]
    fn test_success_after_transient_failures() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let entry = source_file(&src, b"payload");
        let strategy = FlakyStrategy::new(2);
        let dest = dst.path().join("1.txt");

        let copied = copy_entry(&entry, &dest, Action::Create, &strategy, &fast_policy(5), true).unwrap();

        assert_eq!(copied.attempts, 3);
        assert_eq!(copied.bytes, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn test_no_retries_means_one_attempt() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let entry = source_file(&src, b"A");
        let strategy = FlakyStrategy::new(1);

        let result = copy_entry(&entry, &dst.path().join("1.txt"), Action::Create, &strategy, &RetryPolicy::default(), true);

        assert!(result.is_err());
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unrecoverable_error_not_retried() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let entry = source_file(&src, b"A");
        let strategy = MisconfiguredStrategy {
            calls: AtomicU32::new(0),
        };

        let err = copy_entry(&entry, &dst.path().join("1.txt"), Action::Create, &strategy, &fast_policy(5), true)
            .unwrap_err();

        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, SafeCopyError::CopyFailure { attempts: 1, .. }));
    }

    #[test]
    fn test_copy_preserves_mtime() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let entry = source_file(&src, b"A");
        let old = filetime::FileTime::from_unix_time(1_200_000_000, 0);
        filetime::set_file_mtime(&entry.path, old).unwrap();
        let dest = dst.path().join("1.txt");

        copy_entry(&entry, &dest, Action::Create, &StreamCopy::default(), &RetryPolicy::default(), true).unwrap();

        let meta = std::fs::metadata(&dest).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn test_replace_directory_with_file() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let entry = source_file(&src, b"file now");
        let dest = dst.path().join("1.txt");
        std::fs::create_dir_all(dest.join("old")).unwrap();

        copy_entry(&entry, &dest, Action::Replace, &StreamCopy::default(), &RetryPolicy::default(), true).unwrap();

        assert!(dest.is_file());
        assert_eq!(std::fs::read(&dest).unwrap(), b"file now");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_recreated() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let link = src.path().join("link");
        std::os::unix::fs::symlink("../somewhere", &link).unwrap();
        let entry = SyncEntry::from_path(&link, Path::new("a/link")).unwrap();
        let dest = dst.path().join("link");
        std::os::unix::fs::symlink("elsewhere", &dest).unwrap();

        copy_entry(
            &entry,
            &dest,
            Action::Update(crate::sync::Difference::LinkTarget),
            &StreamCopy::default(),
            &RetryPolicy::default(),
            true,
        )
        .unwrap();

        assert_eq!(std::fs::read_link(&dest).unwrap(), Path::new("../somewhere"));
    }

    #[cfg(unix)]
    #[test]
    fn test_setid_bits_masked_on_copy() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let path = src.path().join("tool");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o2755)).unwrap();
        let entry = SyncEntry::from_path(&path, Path::new("bin/tool")).unwrap();
        let dest = dst.path().join("tool");

        copy_entry(&entry, &dest, Action::Create, &StreamCopy::default(), &RetryPolicy::default(), false).unwrap();

        let mode = std::fs::metadata(&dest).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o755);
    }

    #[cfg(unix)]
    fn setuid_entry(dir: &TempDir) -> SyncEntry {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("tool");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o4755)).unwrap();
        SyncEntry::from_path(&path, Path::new("bin/tool")).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_setid_source_warns() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let entry = setuid_entry(&src);
        assert!(entry.has_setid_bits());

        let warnings = count_warnings(|| {
            copy_entry(&entry, &dst.path().join("tool"), Action::Create, &StreamCopy::default(), &RetryPolicy::default(), false)
                .unwrap();
        });

        assert_eq!(warnings, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_nowarn_silences_setid_warning() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let entry = setuid_entry(&src);

        let warnings = count_warnings(|| {
            copy_entry(&entry, &dst.path().join("tool"), Action::Create, &StreamCopy::default(), &RetryPolicy::default(), true)
                .unwrap();
        });

        assert_eq!(warnings, 0);
    }

    #[test]
    fn test_plain_file_does_not_warn() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let entry = source_file(&src, b"A");
        assert!(!entry.has_setid_bits());

        let warnings = count_warnings(|| {
            copy_entry(&entry, &dst.path().join("1.txt"), Action::Create, &StreamCopy::default(), &RetryPolicy::default(), false)
                .unwrap();
        });

        assert_eq!(warnings, 0);
    }
}
