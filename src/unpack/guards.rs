//! Archive extraction guards for bomb protection.
//!
//! Shared by the in-memory unpacker and the on-disk ZIP package path: caps on
//! member count, per-member and total size, compression ratio, plus path
//! traversal (zip slip) rejection.

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Maximum size of a single decompressed member (100 MB)
pub(crate) const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum total extraction size (1 GB)
pub(crate) const MAX_TOTAL_SIZE: u64 = 1024 * 1024 * 1024;

/// Maximum number of members to extract
pub(crate) const MAX_FILE_COUNT: usize = 10_000;

/// Compression ratio above which a member is treated as a bomb (100:1)
pub(crate) const MAX_COMPRESSION_RATIO: u64 = 100;

/// Members smaller than this are never ratio-checked; padding a small
/// payload with zeros is routine for malware.
const RATIO_CHECK_FLOOR: u64 = 1024 * 1024;

/// Reasons a member was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostileArchiveReason {
    /// Member name would escape the extraction directory
    PathTraversal(String),
    /// Compression ratio exceeds the bomb threshold
    ZipBomb { compressed: u64, uncompressed: u64 },
    /// Member count exceeds the limit
    ExcessiveFileCount(usize),
    /// Total uncompressed size exceeds the limit
    ExcessiveTotalSize(u64),
    /// A single member exceeds the per-file limit
    ExcessiveFileSize { file: String, size: u64 },
    /// Member is a symbolic link
    Symlink(String),
}

/// Tracks extraction limits across one unpack operation, nested levels included
#[derive(Debug, Default)]
pub(crate) struct ExtractionGuard {
    total_bytes: AtomicU64,
    file_count: AtomicUsize,
    hostile_reasons: Mutex<Vec<HostileArchiveReason>>,
}

impl ExtractionGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_hostile_reason(&self, reason: HostileArchiveReason) {
        warn!("Refusing archive member: {:?}", reason);
        if let Ok(mut reasons) = self.hostile_reasons.lock() {
            reasons.push(reason);
        }
    }

    #[cfg(test)]
    pub(crate) fn take_reasons(&self) -> Vec<HostileArchiveReason> {
        self.hostile_reasons
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default()
    }

    /// Count one more member, returns false if the limit is exceeded
    pub(crate) fn check_file_count(&self) -> bool {
        let count = self.file_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count > MAX_FILE_COUNT {
            self.add_hostile_reason(HostileArchiveReason::ExcessiveFileCount(count));
            return false;
        }
        true
    }

    /// Check and track bytes, returns false if limits are exceeded
    pub(crate) fn check_bytes(&self, bytes: u64, file_name: &str) -> bool {
        if bytes > MAX_FILE_SIZE {
            self.add_hostile_reason(HostileArchiveReason::ExcessiveFileSize {
                file: file_name.to_string(),
                size: bytes,
            });
            return false;
        }

        let total = self.total_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if total > MAX_TOTAL_SIZE {
            self.add_hostile_reason(HostileArchiveReason::ExcessiveTotalSize(total));
            return false;
        }
        true
    }

    /// Check declared sizes before decompressing a member
    pub(crate) fn check_compression_ratio(&self, compressed: u64, uncompressed: u64) -> bool {
        if uncompressed >= RATIO_CHECK_FLOOR
            && compressed > 0
            && uncompressed / compressed > MAX_COMPRESSION_RATIO
        {
            self.add_hostile_reason(HostileArchiveReason::ZipBomb {
                compressed,
                uncompressed,
            });
            return false;
        }
        true
    }
}

/// Resolve an archive member name under `dest_dir`, rejecting traversal
pub(crate) fn sanitize_entry_path(entry_name: &str, dest_dir: &Path) -> Option<PathBuf> {
    let normalized = entry_name.replace('\\', "/");
    let path = Path::new(&normalized);

    if path.is_absolute() {
        return None;
    }

    let mut result = dest_dir.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(c) => result.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => return None,
        }
    }

    if result == dest_dir || !result.starts_with(dest_dir) {
        return None;
    }
    Some(result)
}

/// Unix mode bits mark a symbolic link
pub(crate) fn is_symlink_mode(mode: u32) -> bool {
    mode & 0o170000 == 0o120000
}

/// Size-limited reader that errors once the limit is consumed
pub(crate) struct LimitedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> LimitedReader<R> {
    pub(crate) fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }
}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            // Only an error if the source still has data
            let mut extra = [0u8; 1];
            return match self.inner.read(&mut extra)? {
                0 => Ok(0),
                _ => Err(std::io::Error::other("size limit exceeded")),
            };
        }
        let max_read = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..max_read])?;
        self.remaining = self.remaining.saturating_sub(n as u64);
        Ok(n)
    }
}

/// Read a member fully, bounded by [`MAX_FILE_SIZE`] and the guard's total
pub(crate) fn read_member<R: Read>(
    reader: R,
    name: &str,
    guard: &ExtractionGuard,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut data = Vec::new();
    LimitedReader::new(reader, MAX_FILE_SIZE).read_to_end(&mut data)?;
    if !guard.check_bytes(data.len() as u64, name) {
        return Ok(None);
    }
    Ok(Some(data))
}
