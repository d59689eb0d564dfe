//! Built-in self-test (`--test`)
//!
//! Builds a small tree in a scratch directory, syncs it with verification,
//! then checks that a second quick pass has nothing to do.

use crate::config::SyncOptions;
use crate::core::{OutcomeStatus, SyncEngine};
use crate::error::{IoResultExt, Result, SafeCopyError};
use std::path::{Path, PathBuf};

/// Scratch directory removed on drop
struct Scratch(PathBuf);

impl Scratch {
    fn create() -> Result<Self> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let path = std::env::temp_dir().join(format!(
            "safecopy-selftest-{}-{}",
            std::process::id(),
            nanos
        ));
        std::fs::create_dir(&path).with_path(&path)?;
        Ok(Self(path))
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn write(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).with_path(path)
}

fn check(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(SafeCopyError::config(format!("self-test failed: {}", message)))
    }
}

/// Run the self-test
pub fn run_self_test() -> Result<()> {
    let scratch = Scratch::create()?;
    let source = scratch.0.join("source");
    let dest = scratch.0.join("dest");

    std::fs::create_dir_all(source.join("nested/deeper")).with_path(&source)?;
    std::fs::create_dir_all(&dest).with_path(&dest)?;
    write(&source.join("small.txt"), b"safecopy self-test\n")?;
    write(&source.join("nested/empty"), b"")?;
    let large: Vec<u8> = (0..256 * 1024u32).map(|i| (i % 251) as u8).collect();
    write(&source.join("nested/deeper/large.bin"), &large)?;

    tracing::info!(path = %scratch.0.display(), "running self-test");

    let first = SyncEngine::new(SyncOptions {
        verify: true,
        ..Default::default()
    })
    .execute(&[source.clone()], &dest)?;
    check(first.is_success(), "first pass reported failures")?;
    check(first.count(OutcomeStatus::Copied) == 6, "first pass did not copy every entry")?;

    let copied = std::fs::read(dest.join("source/nested/deeper/large.bin"))
        .with_path(dest.join("source/nested/deeper/large.bin"))?;
    check(copied == large, "copied content differs")?;

    let second = SyncEngine::new(SyncOptions {
        quick: true,
        ..Default::default()
    })
    .execute(&[source], &dest)?;
    check(second.is_success(), "second pass reported failures")?;
    check(
        second.outcomes.iter().all(|o| o.status == OutcomeStatus::Skipped),
        "second pass was not a no-op",
    )?;

    tracing::info!("self-test passed");
    Ok(())
}
