//! Synchronization engine
//!
//! Drives one pass: validate, delete extraneous entries (optional), then
//! walk each source root and classify, copy, verify and record every entry.
//! The walking thread is the only writer of the report.

use crate::config::SyncOptions;
use crate::core::{Dispatcher, Outcome, OutcomeStatus, SyncReport, WorkerPool};
use crate::error::{IoResultExt, Result, SafeCopyError};
use crate::fs::{
    absolute_path, copy_metadata, make_owner_writable, select_strategy, walk, EntryKind, ExclusionSet, SyncEntry,
    TransferStrategy, Walk,
};
use crate::sync::{classify, copy_entry, verify, Action, Deleter, RetryPolicy};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Where one source root lands in the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootMapping {
    /// Absolute source root
    pub source: PathBuf,
    /// Absolute destination for the root itself
    pub target: PathBuf,
    /// Relative path of the root (its own name)
    pub name: PathBuf,
}

impl RootMapping {
    fn resolve(base: &Path, name: &Path, relative: &Path) -> PathBuf {
        match relative.strip_prefix(name) {
            Ok(rest) if !rest.as_os_str().is_empty() => base.join(rest),
            _ => base.to_path_buf(),
        }
    }

    /// Destination path for a relative entry path under this root
    pub fn dest_path(&self, relative: &Path) -> PathBuf {
        Self::resolve(&self.target, &self.name, relative)
    }

    /// Source path for a relative entry path under this root
    pub fn source_path(&self, relative: &Path) -> PathBuf {
        Self::resolve(&self.source, &self.name, relative)
    }
}

/// Validated inputs of a pass
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// One mapping per source, in argument order
    pub roots: Vec<RootMapping>,
    /// Absolute destination
    pub destination: PathBuf,
    /// Destination was an existing directory (copy into it)
    pub destination_is_dir: bool,
    /// Exclusions with absolute patterns resolved
    pub exclusions: ExclusionSet,
}

impl SyncPlan {
    /// Absolute source roots
    pub fn sources(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|r| r.source.clone()).collect()
    }
}

/// Everything a file job needs, shared read-only by all workers
struct JobContext<'a> {
    strategy: &'a dyn TransferStrategy,
    policy: RetryPolicy,
    nowarn: bool,
    verify: bool,
    quick: bool,
    buffer_size: usize,
}

/// Copy one entry, then verify it if requested
fn transfer_entry(entry: &SyncEntry, dest: &Path, action: Action, ctx: &JobContext<'_>) -> Outcome {
    let copied = match copy_entry(entry, dest, action, ctx.strategy, &ctx.policy, ctx.nowarn) {
        Ok(copied) => copied,
        Err(e) => {
            let attempts = match &e {
                SafeCopyError::CopyFailure { attempts, .. } => *attempts,
                _ => 0,
            };
            return Outcome::failed(&entry.relative_path, entry.kind, OutcomeStatus::CopyFailed, e)
                .with_attempts(attempts);
        }
    };

    if ctx.verify {
        if let Err(e) = verify(entry, dest, ctx.quick, ctx.buffer_size).into_result(&entry.relative_path) {
            return Outcome::failed(&entry.relative_path, entry.kind, OutcomeStatus::VerifyFailed, e)
                .with_bytes(copied.bytes)
                .with_attempts(copied.attempts);
        }
    }

    Outcome::new(&entry.relative_path, entry.kind, OutcomeStatus::Copied)
        .with_bytes(copied.bytes)
        .with_attempts(copied.attempts)
}

/// Mutable state of a running pass
struct RunState<'a> {
    report: SyncReport,
    /// Relative directories whose metadata must be re-applied
    touched: BTreeSet<PathBuf>,
    abort: &'a AtomicBool,
    persist: bool,
}

impl<'a> RunState<'a> {
    fn new(dry_run: bool, persist: bool, abort: &'a AtomicBool) -> Self {
        Self {
            report: SyncReport::new(dry_run),
            touched: BTreeSet::new(),
            abort,
            persist,
        }
    }

    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn stop(&mut self, reason: String) {
        tracing::error!(reason = %reason, "aborting pass");
        self.report.abort(reason);
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Record an outcome and apply the abort rules
    fn record(&mut self, outcome: Outcome) {
        let status = outcome.status;
        let path = outcome.path.clone();

        if matches!(status, OutcomeStatus::Copied | OutcomeStatus::Deleted) {
            if outcome.kind == EntryKind::Directory && status == OutcomeStatus::Copied {
                self.touched.insert(path.clone());
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                self.touched.insert(parent.to_path_buf());
            }
        }

        self.report.record(outcome);

        if status == OutcomeStatus::VerifyFailed {
            self.stop(format!("verification failed for {}", path.display()));
        } else if status.is_failure() && !self.persist {
            self.stop(format!("{} for {}", status, path.display()));
        }
    }
}

/// Main synchronization engine
pub struct SyncEngine {
    options: SyncOptions,
    strategy: Box<dyn TransferStrategy>,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Create an engine; the transfer strategy follows `options.transfer`
    pub fn new(options: SyncOptions) -> Self {
        let strategy = select_strategy(options.transfer, options.buffer_size);
        Self {
            options,
            strategy,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install a custom transfer strategy
    pub fn with_strategy(mut self, strategy: Box<dyn TransferStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Get the pass options
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Get cancellation flag for external control
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Cancel the running pass; entries not yet scheduled are never started
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Validate sources and destination without touching anything
    pub fn plan(&self, sources: &[PathBuf], destination: &Path) -> Result<SyncPlan> {
        if sources.is_empty() {
            return Err(SafeCopyError::config("No source paths given"));
        }
        if self.options.verify_only && (self.options.delete || self.options.dry_run) {
            return Err(SafeCopyError::config(
                "--verify-only cannot be combined with --delete or --dryrun",
            ));
        }

        let destination = absolute_path(destination)?;
        let destination_is_dir = destination.is_dir();

        if !destination_is_dir {
            if sources.len() > 1 {
                return Err(SafeCopyError::config(format!(
                    "Copying more than one source needs an existing destination directory: {}",
                    destination.display()
                )));
            }
            match destination.parent() {
                Some(parent) if parent.is_dir() => {}
                Some(parent) => return Err(SafeCopyError::NotFound(parent.to_path_buf())),
                None => return Err(SafeCopyError::config("Destination has no parent directory")),
            }
        }

        // Resolved destination directory, for overlap checks
        let dest_canonical = if destination_is_dir {
            destination.canonicalize().with_path(&destination)?
        } else {
            let parent = destination.parent().unwrap_or(Path::new("/"));
            let name = destination.file_name().unwrap_or_default();
            parent.canonicalize().with_path(parent)?.join(name)
        };

        let mut roots = Vec::with_capacity(sources.len());
        let mut names = HashSet::new();

        for source in sources {
            if std::fs::symlink_metadata(source).is_err() {
                return Err(SafeCopyError::NotFound(source.clone()));
            }

            let mut absolute = absolute_path(source)?;
            if absolute.file_name().is_none() {
                absolute = absolute.canonicalize().with_path(&absolute)?;
            }
            let name = match absolute.file_name() {
                Some(name) => PathBuf::from(name),
                None => {
                    return Err(SafeCopyError::config(format!(
                        "Cannot sync a filesystem root: {}",
                        source.display()
                    )))
                }
            };

            if !names.insert(name.clone()) {
                return Err(SafeCopyError::config(format!(
                    "Two sources would both be copied to '{}'",
                    name.display()
                )));
            }

            let target = if destination_is_dir {
                destination.join(&name)
            } else {
                destination.clone()
            };
            let target_canonical = if destination_is_dir {
                dest_canonical.join(&name)
            } else {
                dest_canonical.clone()
            };

            let source_canonical = absolute.canonicalize().with_path(&absolute)?;
            if target_canonical == source_canonical {
                return Err(SafeCopyError::SameSourceAndDestination(absolute));
            }
            if source_canonical.is_dir() && target_canonical.starts_with(&source_canonical) {
                return Err(SafeCopyError::config(format!(
                    "Destination {} is inside source {}",
                    target.display(),
                    absolute.display()
                )));
            }
            if self.options.delete
                && destination_is_dir
                && source_canonical.starts_with(&dest_canonical)
            {
                return Err(SafeCopyError::config(format!(
                    "Refusing to delete in {}: it contains source {}",
                    destination.display(),
                    absolute.display()
                )));
            }

            roots.push(RootMapping {
                source: absolute,
                target,
                name,
            });
        }

        let bases: Vec<PathBuf> = roots
            .iter()
            .filter_map(|r| r.source.parent().map(Path::to_path_buf))
            .collect();
        let exclusions = self.options.exclusion_set()?.resolve(&bases)?;

        Ok(SyncPlan {
            roots,
            destination,
            destination_is_dir,
            exclusions,
        })
    }

    /// Run one synchronization pass
    ///
    /// Configuration problems are returned as errors before anything is
    /// touched. Everything after that, including an abort, is in the report.
    pub fn execute(&self, sources: &[PathBuf], destination: &Path) -> Result<SyncReport> {
        let start = Instant::now();
        let plan = self.plan(sources, destination)?;

        tracing::info!(
            sources = plan.roots.len(),
            destination = %plan.destination.display(),
            quick = self.options.quick,
            dry_run = self.options.dry_run,
            strategy = self.strategy.name(),
            "starting pass"
        );

        let abort = AtomicBool::new(false);
        let mut state = RunState::new(self.options.dry_run, self.options.persist, &abort);

        if self.options.verify_only {
            for root in &plan.roots {
                if state.is_aborted() {
                    break;
                }
                self.verify_root(root, &plan.exclusions, &mut state);
            }
        } else {
            if self.options.delete && plan.destination_is_dir {
                let outcomes = Deleter::new(&plan.exclusions, self.options.dry_run)
                    .stop_on_failure(!self.options.persist)
                    .run(&plan.destination, &plan.sources());
                for outcome in outcomes {
                    state.record(outcome);
                }
            }

            let ctx = JobContext {
                strategy: self.strategy.as_ref(),
                policy: RetryPolicy::from_options(&self.options),
                nowarn: self.options.nowarn,
                verify: self.options.verify,
                quick: self.options.quick,
                buffer_size: self.options.buffer_size,
            };

            let workers = self.options.effective_workers();
            let pool = if workers > 1 && !self.options.dry_run {
                Some(WorkerPool::new(workers)?)
            } else {
                None
            };

            for root in &plan.roots {
                if state.is_aborted() {
                    break;
                }
                match &pool {
                    Some(pool) => pool.in_scope(&abort, |dispatcher| {
                        self.sync_root(root, &plan.exclusions, &ctx, &mut state, Some(dispatcher))
                    }),
                    None => self.sync_root(root, &plan.exclusions, &ctx, &mut state, None),
                }
                if !self.options.dry_run {
                    self.apply_dir_metadata(root, &mut state);
                }
            }
        }

        let mut report = state.report;
        report.duration = start.elapsed();

        tracing::info!(
            outcomes = report.outcomes.len(),
            bytes = report.bytes_copied(),
            aborted = report.is_aborted(),
            "pass finished"
        );

        Ok(report)
    }

    fn check_cancelled(&self, state: &mut RunState<'_>) -> bool {
        if self.is_cancelled() && !state.is_aborted() {
            state.stop(SafeCopyError::Cancelled.to_string());
        }
        state.is_aborted()
    }

    fn traversal_failed(&self, root: &RootMapping, err: SafeCopyError, state: &mut RunState<'_>) {
        let path = err.path().cloned().unwrap_or_else(|| root.source.clone());
        state.record(Outcome::failed(path, EntryKind::Other, OutcomeStatus::TraversalFailed, err));
    }

    /// Walk one root: classify, copy and verify every entry
    fn sync_root<'scope>(
        &self,
        root: &RootMapping,
        exclusions: &ExclusionSet,
        ctx: &'scope JobContext<'scope>,
        state: &mut RunState<'_>,
        mut dispatcher: Option<&mut Dispatcher<'_, 'scope, Outcome>>,
    ) {
        let mut entries: Walk<'_> = walk(&root.source, exclusions);
        // Directories a dry run reported as would-copy; nothing below them exists yet
        let mut planned: HashSet<PathBuf> = HashSet::new();

        while let Some(item) = entries.next() {
            if self.check_cancelled(state) {
                break;
            }

            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    self.traversal_failed(root, e, state);
                    break;
                }
            };

            let dest = root.dest_path(&entry.relative_path);

            let under_planned = entry
                .relative_path
                .parent()
                .is_some_and(|parent| planned.contains(parent));
            let classified = if under_planned {
                Ok(Action::Create)
            } else {
                classify(&entry, &dest, &self.options)
            };

            let action = match classified {
                Ok(action) => action,
                Err(e) => {
                    state.record(Outcome::failed(
                        &entry.relative_path,
                        entry.kind,
                        OutcomeStatus::CopyFailed,
                        e,
                    ));
                    if entry.is_dir() {
                        entries.skip_current_dir();
                    }
                    continue;
                }
            };

            if !action.needs_copy() {
                if entry.is_dir() && !self.options.dry_run {
                    self.unlock_dir(&entry.relative_path, &dest, state);
                }
                state.record(Outcome::new(&entry.relative_path, entry.kind, OutcomeStatus::Skipped));
                continue;
            }

            if self.options.dry_run {
                tracing::debug!(path = %entry.relative_path.display(), ?action, "would copy");
                if entry.is_dir() {
                    planned.insert(entry.relative_path.clone());
                }
                state.record(Outcome::new(&entry.relative_path, entry.kind, OutcomeStatus::WouldCopy));
                continue;
            }

            // Directories are created inline, before anything inside them is scheduled
            if entry.is_dir() {
                let outcome = transfer_entry(&entry, &dest, action, ctx);
                let failed = outcome.is_failure();
                state.record(outcome);
                if failed {
                    entries.skip_current_dir();
                }
                continue;
            }

            match dispatcher.as_deref_mut() {
                Some(dispatcher) => {
                    let done = dispatcher.submit(move || transfer_entry(&entry, &dest, action, ctx));
                    for outcome in done {
                        state.record(outcome);
                    }
                }
                None => state.record(transfer_entry(&entry, &dest, action, ctx)),
            }
        }

        if let Some(dispatcher) = dispatcher {
            for outcome in dispatcher.drain() {
                state.record(outcome);
            }
        }
    }

    /// Make an existing destination directory writable for this pass
    ///
    /// Its mode is restored from the source with the other directory metadata.
    fn unlock_dir(&self, relative: &Path, dest: &Path, state: &mut RunState<'_>) {
        match make_owner_writable(dest) {
            Ok(true) => {
                tracing::debug!(path = %relative.display(), "directory made writable for this pass");
                state.touched.insert(relative.to_path_buf());
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(path = %relative.display(), error = %e, "could not make directory writable");
            }
        }
    }

    /// Verify every entry of one root against the destination, copying nothing
    fn verify_root(&self, root: &RootMapping, exclusions: &ExclusionSet, state: &mut RunState<'_>) {
        for item in walk(&root.source, exclusions) {
            if self.check_cancelled(state) {
                break;
            }

            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    self.traversal_failed(root, e, state);
                    break;
                }
            };

            if entry.kind == EntryKind::Other {
                state.record(Outcome::new(&entry.relative_path, entry.kind, OutcomeStatus::Skipped));
                continue;
            }

            let dest = root.dest_path(&entry.relative_path);
            let verification = verify(&entry, &dest, self.options.quick, self.options.buffer_size);
            let outcome = match verification.into_result(&entry.relative_path) {
                Ok(()) => Outcome::new(&entry.relative_path, entry.kind, OutcomeStatus::Verified),
                Err(e) => Outcome::failed(&entry.relative_path, entry.kind, OutcomeStatus::VerifyFailed, e),
            };
            state.record(outcome);
        }
    }

    /// Re-apply directory metadata, deepest first, once a root is done
    fn apply_dir_metadata(&self, root: &RootMapping, state: &mut RunState<'_>) {
        let mut dirs: Vec<PathBuf> = state
            .touched
            .iter()
            .filter(|rel| rel.starts_with(&root.name))
            .cloned()
            .collect();
        dirs.sort_by_key(|rel| std::cmp::Reverse(rel.components().count()));

        for rel in dirs {
            state.touched.remove(&rel);

            let source = root.source_path(&rel);
            let dest = root.dest_path(&rel);
            let both_dirs = std::fs::symlink_metadata(&source).map(|m| m.is_dir()).unwrap_or(false)
                && std::fs::symlink_metadata(&dest).map(|m| m.is_dir()).unwrap_or(false);
            if !both_dirs {
                continue;
            }

            if let Err(e) = copy_metadata(&source, &dest) {
                tracing::warn!(path = %rel.display(), error = %e, "could not set directory metadata");
            }
        }
    }
}
