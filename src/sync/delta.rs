//! Delta transfer against an existing destination
//!
//! rsync-style: the existing destination file (the basis) is cut into fixed
//! blocks, each with a weak rolling checksum and a strong XXH3 hash. The source
//! is scanned with a sliding window; windows that match a basis block become
//! block references, everything else is sent as literal data. The result is
//! rebuilt into a temporary file and renamed over the destination.

use crate::error::{IoResultExt, Result, SafeCopyError};
use crate::fs::{temp_path_for, StreamCopy, TransferMethod, TransferStats, TransferStrategy};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;

/// Smallest block size
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Largest block size
pub const MAX_BLOCK_SIZE: usize = 128 * 1024;

/// Pick a block size for a basis of `len` bytes (about sqrt(len))
pub fn block_size_for(len: u64) -> usize {
    let root = (len as f64).sqrt() as usize;
    let rounded = root.div_ceil(8) * 8;
    rounded.clamp(DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE)
}

/// Rolling checksum for fast block comparison (Adler32-like)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    count: usize,
}

impl RollingChecksum {
    /// Create a new rolling checksum
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate checksum for a block
    pub fn calculate(data: &[u8]) -> Self {
        let mut cs = Self::new();
        for &byte in data {
            cs.a = cs.a.wrapping_add(byte as u32);
            cs.b = cs.b.wrapping_add(cs.a);
            cs.count += 1;
        }
        cs
    }

    /// Get the 32-bit checksum value
    pub fn value(&self) -> u32 {
        (self.b << 16) | (self.a & 0xFFFF)
    }

    /// Slide the window one byte: drop `old_byte`, append `new_byte`
    pub fn roll(&mut self, old_byte: u8, new_byte: u8) {
        self.a = self.a.wrapping_sub(old_byte as u32).wrapping_add(new_byte as u32);
        self.b = self
            .b
            .wrapping_sub((self.count as u32).wrapping_mul(old_byte as u32))
            .wrapping_add(self.a);
    }
}

fn strong_hash(data: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(data)
}

/// Signature of one basis block
#[derive(Debug, Clone)]
pub struct BlockSignature {
    /// Offset in the basis file
    pub offset: u64,
    /// Block length (only the last block may be short)
    pub size: usize,
    /// Weak rolling checksum
    pub weak_checksum: u32,
    /// Strong hash
    pub strong_hash: u64,
}

/// Block signatures of a whole basis file
#[derive(Debug, Clone)]
pub struct FileSignature {
    /// Total basis size
    pub file_size: u64,
    /// Block size used
    pub block_size: usize,
    /// Block signatures in file order
    pub blocks: Vec<BlockSignature>,
}

impl FileSignature {
    /// Generate the signature of `path`
    pub fn generate(path: &Path, block_size: usize) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        let file_size = file.metadata().with_path(path)?.len();
        let mut reader = BufReader::with_capacity(block_size * 4, file);

        let mut blocks = Vec::with_capacity(file_size.div_ceil(block_size as u64) as usize);
        let mut buffer = vec![0u8; block_size];
        let mut offset = 0u64;

        loop {
            let bytes_read = read_block(&mut reader, &mut buffer).with_path(path)?;
            if bytes_read == 0 {
                break;
            }

            let data = &buffer[..bytes_read];
            blocks.push(BlockSignature {
                offset,
                size: bytes_read,
                weak_checksum: RollingChecksum::calculate(data).value(),
                strong_hash: strong_hash(data),
            });

            offset += bytes_read as u64;
        }

        Ok(Self {
            file_size,
            block_size,
            blocks,
        })
    }

    fn weak_index(&self) -> HashMap<u32, Vec<usize>> {
        let mut map: HashMap<u32, Vec<usize>> = HashMap::new();
        for (idx, block) in self.blocks.iter().enumerate() {
            map.entry(block.weak_checksum).or_default().push(idx);
        }
        map
    }

    fn find(&self, index: &HashMap<u32, Vec<usize>>, weak: u32, data: &[u8]) -> Option<usize> {
        let candidates = index.get(&weak)?;
        let strong = strong_hash(data);
        candidates
            .iter()
            .copied()
            .find(|&idx| self.blocks[idx].size == data.len() && self.blocks[idx].strong_hash == strong)
    }
}

/// One reconstruction instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOp {
    /// Copy a block from the basis
    CopyBlock {
        /// Index into the signature's blocks
        index: usize,
    },
    /// Insert literal data
    Literal(Vec<u8>),
}

/// Totals of a delta computation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaSummary {
    /// Size of the reconstructed file
    pub target_size: u64,
    /// Bytes sent as literals
    pub literal_bytes: u64,
    /// Bytes reused from the basis
    pub matched_bytes: u64,
}

impl DeltaSummary {
    /// Percentage of the target reused from the basis
    pub fn savings_percent(&self) -> f64 {
        if self.target_size == 0 {
            0.0
        } else {
            self.matched_bytes as f64 / self.target_size as f64 * 100.0
        }
    }
}

/// Compute the delta from `signature` to `source`, streaming ops to `emit`
///
/// Literal runs are flushed at most one block at a time, so memory stays
/// bounded by the block size.
pub fn compute_delta<F>(signature: &FileSignature, source: &Path, mut emit: F) -> Result<DeltaSummary>
where
    F: FnMut(DeltaOp) -> Result<()>,
{
    let block_size = signature.block_size;
    let index = signature.weak_index();
    let file = File::open(source).with_path(source)?;
    let mut bytes = BufReader::with_capacity(block_size * 4, file).bytes();

    let mut summary = DeltaSummary::default();
    let mut window: VecDeque<u8> = VecDeque::with_capacity(block_size);
    let mut literal: Vec<u8> = Vec::with_capacity(block_size);
    let mut checksum: Option<RollingChecksum> = None;

    let mut next_byte = || -> Result<Option<u8>> { bytes.next().transpose().with_path(source) };

    loop {
        // Refill after a match or at the start
        while window.len() < block_size {
            match next_byte()? {
                Some(b) => window.push_back(b),
                None => break,
            }
        }
        if window.is_empty() {
            break;
        }

        let data = window.make_contiguous();
        let weak = match checksum {
            Some(cs) => cs,
            None => RollingChecksum::calculate(data),
        };

        if let Some(idx) = signature.find(&index, weak.value(), data) {
            if !literal.is_empty() {
                summary.literal_bytes += literal.len() as u64;
                emit(DeltaOp::Literal(std::mem::take(&mut literal)))?;
            }
            summary.matched_bytes += data.len() as u64;
            emit(DeltaOp::CopyBlock { index: idx })?;
            window.clear();
            checksum = None;
            continue;
        }

        // No match: the first byte of the window becomes literal data
        let Some(old) = window.pop_front() else { break };
        literal.push(old);
        if literal.len() >= block_size {
            summary.literal_bytes += literal.len() as u64;
            emit(DeltaOp::Literal(std::mem::take(&mut literal)))?;
        }

        checksum = match next_byte()? {
            Some(new) => {
                window.push_back(new);
                let mut cs = weak;
                cs.roll(old, new);
                Some(cs)
            }
            // Tail shorter than a block: recompute over the shrinking window
            None => None,
        };
    }

    if !literal.is_empty() {
        summary.literal_bytes += literal.len() as u64;
        emit(DeltaOp::Literal(literal))?;
    }

    summary.target_size = summary.literal_bytes + summary.matched_bytes;
    Ok(summary)
}

/// Materialized delta, for inspection and tests
#[derive(Debug, Clone)]
pub struct FileDelta {
    /// Operations to reconstruct the target
    pub ops: Vec<DeltaOp>,
    /// Totals
    pub summary: DeltaSummary,
}

impl FileDelta {
    /// Calculate the full delta between `signature` and `source`
    pub fn calculate(signature: &FileSignature, source: &Path) -> Result<Self> {
        let mut ops = Vec::new();
        let summary = compute_delta(signature, source, |op| {
            ops.push(op);
            Ok(())
        })?;
        Ok(Self { ops, summary })
    }
}

/// Delta transfer strategy
///
/// Falls back to a plain stream copy when there is no regular file at the
/// destination to use as a basis.
#[derive(Debug, Clone)]
pub struct DeltaCopy {
    fallback: StreamCopy,
    buffer_size: usize,
}

impl DeltaCopy {
    /// Create a delta copier
    pub fn new(buffer_size: usize) -> Self {
        Self {
            fallback: StreamCopy::new(buffer_size),
            buffer_size: buffer_size.max(4096),
        }
    }

    fn rebuild(&self, source: &Path, basis: &Path, temp: &Path) -> Result<DeltaSummary> {
        let basis_len = std::fs::metadata(basis).with_path(basis)?.len();
        let signature = FileSignature::generate(basis, block_size_for(basis_len))?;

        let mut basis_file = File::open(basis).with_path(basis)?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, File::create(temp).with_path(temp)?);
        let mut block = vec![0u8; signature.block_size];

        let summary = compute_delta(&signature, source, |op| {
            match op {
                DeltaOp::CopyBlock { index } => {
                    let sig = &signature.blocks[index];
                    let buf = &mut block[..sig.size];
                    basis_file.seek(SeekFrom::Start(sig.offset)).with_path(basis)?;
                    basis_file.read_exact(buf).with_path(basis)?;
                    writer.write_all(buf).with_path(temp)?;
                }
                DeltaOp::Literal(data) => writer.write_all(&data).with_path(temp)?,
            }
            Ok(())
        })?;

        writer.flush().with_path(temp)?;

        // The source may have changed while it was being scanned
        let expected = std::fs::metadata(source).with_path(source)?.len();
        if summary.target_size != expected {
            return Err(SafeCopyError::Transfer {
                path: source.to_path_buf(),
                message: format!("source changed during delta: {} of {} bytes", summary.target_size, expected),
            });
        }

        Ok(summary)
    }
}

impl TransferStrategy for DeltaCopy {
    fn name(&self) -> &'static str {
        "delta"
    }

    fn transfer(&self, source: &Path, dest: &Path) -> Result<TransferStats> {
        let has_basis = std::fs::symlink_metadata(dest)
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !has_basis {
            return self.fallback.transfer(source, dest);
        }

        let start = Instant::now();
        let temp = temp_path_for(dest);

        let result = self
            .rebuild(source, dest, &temp)
            .and_then(|summary| std::fs::rename(&temp, dest).with_path(dest).map(|_| summary));

        match result {
            Ok(summary) => {
                tracing::debug!(
                    path = %source.display(),
                    literal = summary.literal_bytes,
                    reused = summary.matched_bytes,
                    savings = %format!("{:.1}%", summary.savings_percent()),
                    "delta transfer"
                );
                Ok(TransferStats {
                    bytes_copied: summary.literal_bytes,
                    bytes_reused: summary.matched_bytes,
                    duration: start.elapsed(),
                    method: TransferMethod::Delta,
                })
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                Err(e)
            }
        }
    }
}

fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
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

    fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn test_rolling_matches_fresh_calculation() {
        let data = pseudo_random(300, 1);
        let window = 64;
        let mut cs = RollingChecksum::calculate(&data[..window]);

        for start in 1..(data.len() - window) {
            cs.roll(data[start - 1], data[start + window - 1]);
            let fresh = RollingChecksum::calculate(&data[start..start + window]);
            assert_eq!(cs.value(), fresh.value(), "window at {start}");
        }
    }

    #[test]
    fn test_block_size_bounds() {
        assert_eq!(block_size_for(0), DEFAULT_BLOCK_SIZE);
        assert_eq!(block_size_for(1 << 40), MAX_BLOCK_SIZE);
        assert_eq!(block_size_for(10_000 * 10_000) % 8, 0);
    }

    #[test]
    fn test_file_signature() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "basis.bin", &vec![0xABu8; 10_000]);

        let sig = FileSignature::generate(&path, 4096).unwrap();

        assert_eq!(sig.file_size, 10_000);
        assert_eq!(sig.blocks.len(), 3);
        assert_eq!(sig.blocks[2].size, 10_000 - 8192);
        assert_eq!(sig.blocks[1].offset, 4096);
    }

    #[test]
    fn test_delta_identical() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "same.bin", &pseudo_random(50_000, 7));

        let sig = FileSignature::generate(&path, 4096).unwrap();
        let delta = FileDelta::calculate(&sig, &path).unwrap();

        assert_eq!(delta.summary.literal_bytes, 0);
        assert_eq!(delta.summary.matched_bytes, 50_000);
        assert!(delta.ops.iter().all(|op| matches!(op, DeltaOp::CopyBlock { .. })));
    }

    #[test]
    fn test_delta_finds_shifted_blocks() {
        let dir = TempDir::new().unwrap();
        let basis_data = pseudo_random(40_960, 3);
        let mut source_data = b"inserted prefix".to_vec();
        source_data.extend_from_slice(&basis_data);

        let basis = create_test_file(dir.path(), "basis.bin", &basis_data);
        let source = create_test_file(dir.path(), "source.bin", &source_data);

        let sig = FileSignature::generate(&basis, 4096).unwrap();
        let delta = FileDelta::calculate(&sig, &source).unwrap();

        assert_eq!(delta.summary.literal_bytes, 15);
        assert_eq!(delta.summary.matched_bytes, 40_960);
        assert!(delta.summary.savings_percent() > 99.0);
    }

    #[test]
    fn test_delta_copy_rebuilds_modified_file() {
        let dir = TempDir::new().unwrap();
        let original = pseudo_random(100_000, 11);
        let mut modified = original.clone();
        modified[50_000..50_100].fill(0x42);
        modified.extend_from_slice(b"appended tail");

        let source = create_test_file(dir.path(), "source.bin", &modified);
        let dest = create_test_file(dir.path(), "dest.bin", &original);

        let stats = DeltaCopy::new(64 * 1024).transfer(&source, &dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), modified);
        assert_eq!(stats.method, TransferMethod::Delta);
        assert!(stats.bytes_reused > stats.bytes_copied);
    }

    #[test]
    fn test_delta_copy_without_basis_streams() {
        let dir = TempDir::new().unwrap();
        let source = create_test_file(dir.path(), "source.bin", b"fresh content");
        let dest = dir.path().join("dest.bin");

        let stats = DeltaCopy::new(4096).transfer(&source, &dest).unwrap();

        assert_ne!(stats.method, TransferMethod::Delta);
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh content");
    }

    #[test]
    fn test_delta_copy_shrinks_file() {
        let dir = TempDir::new().unwrap();
        let original = pseudo_random(30_000, 5);
        let source = create_test_file(dir.path(), "source.bin", &original[..12_000]);
        let dest = create_test_file(dir.path(), "dest.bin", &original);

        DeltaCopy::new(4096).transfer(&source, &dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), &original[..12_000]);
    }
}
