//! Pluggable byte transfer for a single file
//!
//! A strategy moves the contents of one regular file. It never touches
//! metadata, retries, or verification; the copier owns those.

use crate::config::TransferKind;
use crate::error::{IoResultExt, Result, SafeCopyError};
use crate::fs::temp_path_for;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

/// Transfer statistics for one file
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// Bytes written to the destination
    pub bytes_copied: u64,
    /// Bytes that did not need to be sent (delta reuse)
    pub bytes_reused: u64,
    /// Duration of the transfer
    pub duration: Duration,
    /// Method used
    pub method: TransferMethod,
}

impl TransferStats {
    /// Throughput in bytes/second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.bytes_copied as f64 / secs
        } else {
            0.0
        }
    }
}

/// How the bytes were moved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransferMethod {
    /// Buffered read/write
    #[default]
    Buffered,
    /// Kernel-side copy (`copy_file_range`)
    ZeroCopy,
    /// Reconstructed from a block delta
    Delta,
}

/// Moves the contents of `source` to `dest`
///
/// Implementations must leave `dest` either fully written or untouched.
pub trait TransferStrategy: Send + Sync {
    /// Short name for logs and reports
    fn name(&self) -> &'static str;

    /// Transfer one regular file
    fn transfer(&self, source: &Path, dest: &Path) -> Result<TransferStats>;
}

/// Plain stream copy through a temporary sibling file
#[derive(Debug, Clone)]
pub struct StreamCopy {
    buffer_size: usize,
    zero_copy: bool,
}

impl Default for StreamCopy {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl StreamCopy {
    /// Create a stream copier with the given buffer size
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(4096),
            zero_copy: cfg!(target_os = "linux"),
        }
    }

    /// Disable the kernel-side fast path
    pub fn without_zero_copy(mut self) -> Self {
        self.zero_copy = false;
        self
    }

    fn write_temp(&self, source: &Path, temp: &Path) -> Result<(u64, TransferMethod)> {
        let size = std::fs::metadata(source).with_path(source)?.len();

        if self.zero_copy && size > 0 {
            match copy_zero_copy(source, temp, size) {
                Ok(bytes) => return Ok((bytes, TransferMethod::ZeroCopy)),
                Err(e) => {
                    tracing::debug!(path = %source.display(), error = %e, "zero-copy unavailable, using buffered copy");
                }
            }
        }

        let bytes = self.copy_buffered(source, temp)?;
        Ok((bytes, TransferMethod::Buffered))
    }

    fn copy_buffered(&self, source: &Path, dest: &Path) -> Result<u64> {
        let src_file = File::open(source).with_path(source)?;
        let dst_file = File::create(dest).with_path(dest)?;

        let mut reader = BufReader::with_capacity(self.buffer_size, src_file);
        let mut writer = BufWriter::with_capacity(self.buffer_size, dst_file);

        let bytes_copied = std::io::copy(&mut reader, &mut writer)
            .map_err(|e| SafeCopyError::io(source, e))?;

        writer.flush().with_path(dest)?;

        Ok(bytes_copied)
    }
}

impl TransferStrategy for StreamCopy {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn transfer(&self, source: &Path, dest: &Path) -> Result<TransferStats> {
        let start = Instant::now();
        let temp = temp_path_for(dest);

        let result = self
            .write_temp(source, &temp)
            .and_then(|written| std::fs::rename(&temp, dest).with_path(dest).map(|_| written));

        match result {
            Ok((bytes_copied, method)) => Ok(TransferStats {
                bytes_copied,
                bytes_reused: 0,
                duration: start.elapsed(),
                method,
            }),
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                Err(e)
            }
        }
    }
}

/// Kernel-side copy with `copy_file_range`
#[cfg(target_os = "linux")]
fn copy_zero_copy(source: &Path, dest: &Path, size: u64) -> Result<u64> {
    use std::os::unix::io::AsRawFd;

    let src_file = File::open(source).with_path(source)?;
    let dst_file = File::create(dest).with_path(dest)?;

    let src_fd = src_file.as_raw_fd();
    let dst_fd = dst_file.as_raw_fd();

    let mut total_copied: u64 = 0;
    let mut offset_in: i64 = 0;
    let mut offset_out: i64 = 0;

    while total_copied < size {
        let to_copy = (size - total_copied).min(1 << 30) as usize;

        let copied = unsafe {
            libc::copy_file_range(src_fd, &mut offset_in, dst_fd, &mut offset_out, to_copy, 0)
        };

        if copied < 0 {
            let err = std::io::Error::last_os_error();
            return Err(SafeCopyError::io(source, err));
        }

        if copied == 0 {
            break; // EOF
        }

        total_copied += copied as u64;
    }

    // File shrank under us; let the buffered path produce an exact copy
    if total_copied != size {
        return Err(SafeCopyError::Transfer {
            path: source.to_path_buf(),
            message: format!("expected {} bytes, copied {}", size, total_copied),
        });
    }

    Ok(total_copied)
}

#[cfg(not(target_os = "linux"))]
fn copy_zero_copy(source: &Path, _dest: &Path, _size: u64) -> Result<u64> {
    Err(SafeCopyError::Transfer {
        path: source.to_path_buf(),
        message: "zero-copy not supported on this platform".to_string(),
    })
}

/// Build the strategy for a pass
pub fn select_strategy(kind: TransferKind, buffer_size: usize) -> Box<dyn TransferStrategy> {
    match kind {
        TransferKind::Stream => Box::new(StreamCopy::new(buffer_size)),
        TransferKind::Delta => Box::new(crate::sync::DeltaCopy::new(buffer_size)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.join(name);
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_stream_copy() {
        let dir = TempDir::new().unwrap();
        let src = create_test_file(dir.path(), "src.bin", 300_000);
        let dst = dir.path().join("dst.bin");

        let stats = StreamCopy::new(64 * 1024).transfer(&src, &dst).unwrap();

        assert_eq!(stats.bytes_copied, 300_000);
        assert_eq!(std::fs::read(&src).unwrap(), std::fs::read(&dst).unwrap());
    }

    #[test]
    fn test_buffered_copy_overwrites() {
        let dir = TempDir::new().unwrap();
        let src = create_test_file(dir.path(), "src.bin", 1000);
        let dst = dir.path().join("dst.bin");
        std::fs::write(&dst, vec![0xFFu8; 5000]).unwrap();

        let stats = StreamCopy::new(4096)
            .without_zero_copy()
            .transfer(&src, &dst)
            .unwrap();

        assert_eq!(stats.method, TransferMethod::Buffered);
        assert_eq!(std::fs::read(&dst).unwrap().len(), 1000);
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let src = create_test_file(dir.path(), "empty", 0);
        let dst = dir.path().join("empty.copy");

        let stats = StreamCopy::default().transfer(&src, &dst).unwrap();
        assert_eq!(stats.bytes_copied, 0);
        assert!(dst.exists());
    }

    #[test]
    fn test_failed_transfer_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("dst.bin");

        let result = StreamCopy::default().transfer(&dir.path().join("missing"), &dst);

        assert!(result.is_err());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_select_strategy() {
        assert_eq!(select_strategy(TransferKind::Stream, 4096).name(), "stream");
        assert_eq!(select_strategy(TransferKind::Delta, 4096).name(), "delta");
    }
}
