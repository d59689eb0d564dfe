//! Streaming byte-for-byte comparison
//!
//! Both files are read in lockstep through fixed-size buffers, so memory use
//! is bounded no matter how large the files are. Comparison stops at the
//! first differing byte.

use crate::error::{IoResultExt, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Result of comparing two files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentComparison {
    /// Same length, same bytes
    Equal,
    /// First differing byte offset (or the shorter file's length)
    Differs {
        /// Offset of the first difference
        offset: u64,
    },
}

impl ContentComparison {
    /// Check if the contents were equal
    pub fn is_equal(&self) -> bool {
        matches!(self, Self::Equal)
    }
}

/// Count the leading bytes the two files have in common
pub fn count_equal_bytes(a: &Path, b: &Path, buffer_size: usize) -> Result<u64> {
    let buffer_size = buffer_size.max(4096);
    let mut reader_a = BufReader::with_capacity(buffer_size, File::open(a).with_path(a)?);
    let mut reader_b = BufReader::with_capacity(buffer_size, File::open(b).with_path(b)?);

    let mut buf_a = vec![0u8; buffer_size];
    let mut buf_b = vec![0u8; buffer_size];
    let mut equal: u64 = 0;

    loop {
        let read_a = read_full(&mut reader_a, &mut buf_a).with_path(a)?;
        let read_b = read_full(&mut reader_b, &mut buf_b).with_path(b)?;
        let common = read_a.min(read_b);

        if let Some(pos) = buf_a[..common]
            .iter()
            .zip(&buf_b[..common])
            .position(|(x, y)| x != y)
        {
            return Ok(equal + pos as u64);
        }

        equal += common as u64;

        if read_a != read_b || read_a == 0 {
            return Ok(equal);
        }
    }
}

/// Compare two files byte for byte
pub fn contents_equal(a: &Path, b: &Path, buffer_size: usize) -> Result<ContentComparison> {
    let len_a = std::fs::metadata(a).with_path(a)?.len();
    let len_b = std::fs::metadata(b).with_path(b)?.len();

    let equal = count_equal_bytes(a, b, buffer_size)?;

    if equal == len_a && equal == len_b {
        Ok(ContentComparison::Equal)
    } else {
        Ok(ContentComparison::Differs { offset: equal })
    }
}

/// Fill `buf` unless EOF comes first
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_equal_files() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 256) as u8).collect();
        let a = write(&dir, "a", &data);
        let b = write(&dir, "b", &data);

        assert_eq!(contents_equal(&a, &b, 4096).unwrap(), ContentComparison::Equal);
        assert_eq!(count_equal_bytes(&a, &b, 4096).unwrap(), 50_000);
    }

    #[test]
    fn test_single_byte_difference_across_buffers() {
        let dir = TempDir::new().unwrap();
        let data = vec![7u8; 20_000];
        let mut corrupted = data.clone();
        corrupted[12_345] ^= 0x01;
        let a = write(&dir, "a", &data);
        let b = write(&dir, "b", &corrupted);

        assert_eq!(
            contents_equal(&a, &b, 4096).unwrap(),
            ContentComparison::Differs { offset: 12_345 }
        );
    }

    #[test]
    fn test_prefix_is_not_equal() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a", b"hello world");
        let b = write(&dir, "b", b"hello");

        let result = contents_equal(&a, &b, 4096).unwrap();
        assert_eq!(result, ContentComparison::Differs { offset: 5 });
        assert!(!result.is_equal());
    }

    #[test]
    fn test_empty_files() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a", b"");
        let b = write(&dir, "b", b"");

        assert!(contents_equal(&a, &b, 4096).unwrap().is_equal());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a", b"x");

        assert!(contents_equal(&a, &dir.path().join("nope"), 4096).is_err());
    }
}
