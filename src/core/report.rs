//! Per-entry outcomes and the pass report
//!
//! The orchestrator is the only writer; outcomes are never changed once
//! recorded.

use crate::fs::EntryKind;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What happened to one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    /// Written to the destination
    Copied,
    /// Destination already up to date
    Skipped,
    /// Removed from the destination
    Deleted,
    /// Destination confirmed by a verify-only pass
    Verified,
    /// Dry run: would have been written
    WouldCopy,
    /// Dry run: would have been removed
    WouldDelete,
    /// Every copy attempt failed
    CopyFailed,
    /// Destination does not match the source
    VerifyFailed,
    /// Removal failed
    DeleteFailed,
    /// Source path could not be read
    TraversalFailed,
}

impl OutcomeStatus {
    /// Check if this status is a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::CopyFailed | Self::VerifyFailed | Self::DeleteFailed | Self::TraversalFailed
        )
    }

    /// Get the display label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Copied => "copied",
            Self::Skipped => "skipped",
            Self::Deleted => "deleted",
            Self::Verified => "verified",
            Self::WouldCopy => "would-copy",
            Self::WouldDelete => "would-delete",
            Self::CopyFailed => "copy-failed",
            Self::VerifyFailed => "verify-failed",
            Self::DeleteFailed => "delete-failed",
            Self::TraversalFailed => "traversal-failed",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result for one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// Relative path (starts with the source name; destination-relative for deletions)
    pub path: PathBuf,
    /// Entry kind
    pub kind: EntryKind,
    /// Status
    pub status: OutcomeStatus,
    /// Bytes written
    pub bytes: u64,
    /// Copy attempts used
    #[serde(skip_serializing_if = "is_zero")]
    pub attempts: u32,
    /// Error message for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Outcome {
    /// Create an outcome with no bytes and no error
    pub fn new(path: impl Into<PathBuf>, kind: EntryKind, status: OutcomeStatus) -> Self {
        Self {
            path: path.into(),
            kind,
            status,
            bytes: 0,
            attempts: 0,
            error: None,
        }
    }

    /// Create a failed outcome
    pub fn failed(
        path: impl Into<PathBuf>,
        kind: EntryKind,
        status: OutcomeStatus,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(path, kind, status)
        }
    }

    /// Set bytes written
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }

    /// Set attempts used
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Check if this outcome is a failure
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

/// Final state of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassState {
    /// Every root was processed
    Completed,
    /// Stopped early; later entries were never scheduled
    Aborted,
}

/// Aggregated result of one synchronization pass
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Outcomes in the order they were recorded
    pub outcomes: Vec<Outcome>,
    /// Final state
    pub state: PassState,
    /// Why the pass stopped early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Wall-clock duration
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    /// True if nothing was mutated
    pub dry_run: bool,
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

impl Default for SyncReport {
    fn default() -> Self {
        Self::new(false)
    }
}

impl SyncReport {
    /// Create an empty, completed report
    pub fn new(dry_run: bool) -> Self {
        Self {
            outcomes: Vec::new(),
            state: PassState::Completed,
            abort_reason: None,
            duration: Duration::ZERO,
            dry_run,
        }
    }

    /// Record one outcome
    pub fn record(&mut self, outcome: Outcome) {
        match outcome.status {
            status if status.is_failure() => tracing::error!(
                path = %outcome.path.display(),
                status = %status,
                error = outcome.error.as_deref().unwrap_or(""),
                "entry failed"
            ),
            OutcomeStatus::Skipped => {
                tracing::debug!(path = %outcome.path.display(), "skipped")
            }
            status => tracing::info!(
                path = %outcome.path.display(),
                status = %status,
                bytes = outcome.bytes,
                "entry done"
            ),
        }
        self.outcomes.push(outcome);
    }

    /// Record several outcomes in order
    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = Outcome>) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }

    /// Mark the pass aborted; the first reason wins
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.state == PassState::Completed {
            self.state = PassState::Aborted;
            self.abort_reason = Some(reason.into());
        }
    }

    /// Check if the pass was aborted
    pub fn is_aborted(&self) -> bool {
        self.state == PassState::Aborted
    }

    /// Count outcomes with `status`
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Count outcomes per status
    pub fn counts(&self) -> BTreeMap<OutcomeStatus, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            *counts.entry(outcome.status).or_insert(0) += 1;
        }
        counts
    }

    /// Total bytes written
    pub fn bytes_copied(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes).sum()
    }

    /// Failed outcomes
    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    /// Find the outcome for a relative path
    pub fn outcome_for(&self, path: impl AsRef<Path>) -> Option<&Outcome> {
        let path = path.as_ref();
        self.outcomes.iter().find(|o| o.path == path)
    }

    /// Completed with no failures
    pub fn is_success(&self) -> bool {
        self.state == PassState::Completed && self.failures().next().is_none()
    }

    /// Process exit status for this report
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Print a human-readable summary to stdout
    pub fn print_summary(&self) {
        if self.dry_run {
            println!("\n=== Sync Summary (dry run) ===");
        } else {
            println!("\n=== Sync Summary ===");
        }
        for (status, count) in self.counts() {
            println!("{:<16} {}", format!("{}:", status.label()), count);
        }
        println!("{:<16} {}", "Bytes copied:", humansize::format_size(self.bytes_copied(), humansize::BINARY));
        println!("{:<16} {}", "Duration:", humantime::format_duration(self.duration));

        let failures: Vec<&Outcome> = self.failures().collect();
        if !failures.is_empty() {
            println!("\nFailures: {}", failures.len());
            for outcome in failures {
                println!(
                    "  {} [{}] - {}",
                    outcome.path.display(),
                    outcome.status,
                    outcome.error.as_deref().unwrap_or("")
                );
            }
        }

        if let Some(reason) = &self.abort_reason {
            println!("\nAborted: {}", reason);
        }
    }
}
