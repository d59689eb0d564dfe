//! Error types for SafeCopy
//!
//! Configuration errors are raised before the destination is touched.
//! Per-entry errors (`Traversal`, `CopyFailure`, `VerifyMismatch`) are scoped
//! to one entry and only escalate to a pass abort through the engine's rules.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for SafeCopy operations
#[derive(Error, Debug)]
pub enum SafeCopyError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File or directory not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Source and destination resolve to the same place
    #[error("Source and destination are the same: {0}")]
    SameSourceAndDestination(PathBuf),

    /// A path could not be read while walking a tree
    #[error("Unable to read '{path}': {message}")]
    Traversal { path: PathBuf, message: String },

    /// Every transfer attempt for a file failed
    #[error("Copy of '{path}' failed after {attempts} attempt(s): {source}")]
    CopyFailure {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: Box<SafeCopyError>,
    },

    /// Destination does not match the source after copying
    #[error("Verification failed for '{path}': {reason}")]
    VerifyMismatch { path: PathBuf, reason: String },

    /// Malformed exclusion pattern
    #[error("Invalid exclusion pattern '{pattern}': {message}")]
    ExclusionConfig { pattern: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transfer strategy error that is not a plain I/O failure
    #[error("Transfer error at '{path}': {message}")]
    Transfer { path: PathBuf, message: String },

    /// Pass stopped before this entry was processed
    #[error("Operation cancelled")]
    Cancelled,
}

impl SafeCopyError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an exclusion pattern error
    pub fn exclusion(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExclusionConfig {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Create a verification mismatch
    pub fn verify_mismatch(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::VerifyMismatch {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Transfer { .. })
    }

    /// Check if this error is a permission issue
    pub fn is_permission_error(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::PermissionDenied,
            Self::CopyFailure { source, .. } => source.is_permission_error(),
            _ => false,
        }
    }

    /// Check if this error came from a configuration problem
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ExclusionConfig { .. }
                | Self::NotFound(_)
                | Self::SameSourceAndDestination(_)
        )
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. }
            | Self::NotFound(path)
            | Self::SameSourceAndDestination(path)
            | Self::Traversal { path, .. }
            | Self::CopyFailure { path, .. }
            | Self::VerifyMismatch { path, .. }
            | Self::Transfer { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for SafeCopy operations
pub type Result<T> = std::result::Result<T, SafeCopyError>;

impl From<walkdir::Error> for SafeCopyError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
        let message = match err.io_error() {
            Some(io) => io.to_string(),
            None => err.to_string(),
        };
        SafeCopyError::Traversal { path, message }
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| SafeCopyError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SafeCopyError::io("/test/path", io_err);
        assert_eq!(err.path(), Some(&PathBuf::from("/test/path")));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_permission_error_through_copy_failure() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = SafeCopyError::CopyFailure {
            path: PathBuf::from("a/1.txt"),
            attempts: 3,
            source: Box::new(SafeCopyError::io("a/1.txt", io_err)),
        };
        assert!(err.is_permission_error());
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn test_config_errors() {
        assert!(SafeCopyError::exclusion("[", "unclosed").is_config_error());
        assert!(SafeCopyError::config("bad").is_config_error());
        assert!(!SafeCopyError::verify_mismatch("x", "size").is_config_error());
    }

    #[test]
    fn test_with_path() {
        let result: std::io::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = result.with_path("/some/file").unwrap_err();
        assert!(err.to_string().contains("/some/file"));
    }
}
