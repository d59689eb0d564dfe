//! Configuration settings for SafeCopy
//!
//! Defines the command-line surface and the `SyncOptions` the engine
//! consumes. Everything here is validated before any filesystem mutation.

use crate::error::{Result, SafeCopyError};
use crate::fs::ExclusionSet;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// SafeCopy - verified directory and drive synchronization
#[derive(Parser, Debug, Clone)]
#[command(name = "safecopy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sync files, verifying every copy")]
#[command(long_about = r#"
SafeCopy copies SOURCE paths to DESTINATION and guarantees each copied file
is correct, either by byte-for-byte comparison (the default) or by size and
modification time (--quick).

If DESTINATION is an existing directory, each SOURCE is copied into it.
Otherwise the single SOURCE is copied to DESTINATION.

Examples:
  safecopy /home/me/docs /mnt/backup                  # Full compare
  safecopy --quick --delete /data /mnt/mirror         # Mirror by metadata
  safecopy --verify --retries 3 photos /media/usb     # Verify, retry flaky media
  safecopy --dryrun --exclude docs/tmp,*.swp docs /mnt/backup
"#)]
pub struct CliArgs {
    /// Copy files to the destination. The last path is the destination
    #[arg(value_name = "SOURCE... DESTINATION")]
    pub paths: Vec<PathBuf>,

    /// Show progress (repeat for more detail)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only update files if the size or last modified time is different
    #[arg(long)]
    pub quick: bool,

    /// Show what would be done, but don't do anything
    #[arg(long, visible_alias = "dry-run")]
    pub dryrun: bool,

    /// Delete all files that are not in the source before copying any files
    #[arg(long)]
    pub delete: bool,

    /// No warnings
    #[arg(long)]
    pub nowarn: bool,

    /// Exclude the following files and/or directories (comma separated)
    #[arg(long, value_name = "PATH,...", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Verify copies
    #[arg(long)]
    pub verify: bool,

    /// Only verify the destination against the sources, copy nothing
    #[arg(long, conflicts_with_all = ["delete", "dryrun"])]
    pub verify_only: bool,

    /// Continue on errors, except verify errors
    #[arg(long)]
    pub persist: bool,

    /// How many times to retry a failed copy. Default is not to retry
    #[arg(long, default_value = "0", value_name = "N", env = "SAFECOPY_RETRIES")]
    pub retries: u32,

    /// Initial delay between retries in milliseconds (doubles each retry)
    #[arg(long, default_value = "100", value_name = "MS")]
    pub retry_delay: u64,

    /// Transfer strategy for file contents
    #[arg(long, value_enum, default_value = "stream", env = "SAFECOPY_TRANSFER")]
    pub transfer: TransferKind,

    /// Parallel file copies (0 = one per CPU)
    #[arg(long, default_value = "1", value_name = "NUM", env = "SAFECOPY_WORKERS")]
    pub workers: usize,

    /// Buffer size for file reads and writes (e.g., 1M, 64K)
    #[arg(long, default_value = "1M", value_name = "SIZE")]
    pub buffer_size: String,

    /// Run the built-in self test
    #[arg(long)]
    pub test: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Output format for the final report
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

impl CliArgs {
    /// Split positional paths into sources and the destination
    pub fn split_paths(&self) -> Result<(Vec<PathBuf>, PathBuf)> {
        match self.paths.split_last() {
            Some((destination, sources)) if !sources.is_empty() => {
                Ok((sources.to_vec(), destination.clone()))
            }
            _ => Err(SafeCopyError::config(
                "More than one path needed: safecopy SOURCE... DESTINATION",
            )),
        }
    }
}

/// How file contents are moved to the destination
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Plain streamed copy of the whole file
    #[default]
    Stream,
    /// Block-signature delta against the existing destination file
    Delta,
}

impl TransferKind {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Delta => "delta",
        }
    }
}

/// Log line format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Options for one synchronization pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Compare by size and modification time only
    pub quick: bool,
    /// Compute and report, never mutate
    pub dry_run: bool,
    /// Remove destination entries absent from every source, before copying
    pub delete: bool,
    /// Verify each copy after it is written
    pub verify: bool,
    /// Verify existing destination entries instead of copying
    pub verify_only: bool,
    /// Continue past non-verification failures
    pub persist: bool,
    /// Suppress advisory warnings
    pub nowarn: bool,
    /// Additional attempts per file after the first failure
    pub retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub retry_delay: Duration,
    /// Raw exclusion patterns
    pub exclude: Vec<String>,
    /// Transfer strategy, selected once per pass
    pub transfer: TransferKind,
    /// Parallel file copies (0 = one per CPU, 1 = inline)
    pub workers: usize,
    /// Buffer size in bytes for streaming reads and writes
    pub buffer_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            quick: false,
            dry_run: false,
            delete: false,
            verify: false,
            verify_only: false,
            persist: false,
            nowarn: false,
            retries: 0,
            retry_delay: Duration::from_millis(100),
            exclude: Vec::new(),
            transfer: TransferKind::Stream,
            workers: 1,
            buffer_size: 1024 * 1024, // 1MB
        }
    }
}

impl SyncOptions {
    /// Create options from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let buffer_size = parse_size(&args.buffer_size)
            .map_err(|e| SafeCopyError::config(format!("Invalid buffer size: {}", e)))?;
        if buffer_size == 0 {
            return Err(SafeCopyError::config("Buffer size must be greater than zero"));
        }

        let options = Self {
            quick: args.quick,
            dry_run: args.dryrun,
            delete: args.delete,
            verify: args.verify,
            verify_only: args.verify_only,
            persist: args.persist,
            nowarn: args.nowarn,
            retries: args.retries,
            retry_delay: Duration::from_millis(args.retry_delay),
            exclude: args.exclude.clone(),
            transfer: args.transfer,
            workers: args.workers,
            buffer_size: buffer_size as usize,
        };

        // Fail fast on bad patterns
        options.exclusion_set()?;

        Ok(options)
    }

    /// Compile the exclusion patterns
    pub fn exclusion_set(&self) -> Result<ExclusionSet> {
        ExclusionSet::from_patterns(&self.exclude)
    }

    /// Resolve the worker count (0 = one per CPU)
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(['G', 'B']), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(['M', 'B']), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(['K', 'B']), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        // Assume bytes if no suffix
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    if num < 0.0 {
        return Err(format!("Negative size: {}", num_str));
    }

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("1.5G").unwrap(), (1.5 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert!(parse_size("").is_err());
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_cli_flags_map_to_options() {
        let args = CliArgs::parse_from([
            "safecopy",
            "--quick",
            "--persist",
            "--retries",
            "2",
            "--exclude",
            "docs/tmp,*.swp",
            "docs",
            "/mnt/backup",
        ]);
        let options = SyncOptions::from_cli(&args).unwrap();
        assert!(options.quick);
        assert!(options.persist);
        assert!(!options.dry_run);
        assert_eq!(options.retries, 2);
        assert_eq!(options.exclude, vec!["docs/tmp", "*.swp"]);

        let (sources, destination) = args.split_paths().unwrap();
        assert_eq!(sources, vec![PathBuf::from("docs")]);
        assert_eq!(destination, PathBuf::from("/mnt/backup"));
    }

    #[test]
    fn test_single_path_rejected() {
        let args = CliArgs::parse_from(["safecopy", "only-one"]);
        assert!(args.split_paths().is_err());
    }

    #[test]
    fn test_bad_exclude_fails_fast() {
        let args = CliArgs::parse_from(["safecopy", "--exclude", "a/[b", "src", "dst"]);
        let err = SyncOptions::from_cli(&args).unwrap_err();
        assert!(matches!(err, SafeCopyError::ExclusionConfig { .. }));
    }

    #[test]
    fn test_defaults() {
        let options = SyncOptions::default();
        assert_eq!(options.retries, 0);
        assert_eq!(options.workers, 1);
        assert_eq!(options.transfer, TransferKind::Stream);
        assert!(!options.quick);
    }
}
