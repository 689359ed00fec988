//! Buffered random-access over a blob.
//!
//! [`BufferedSource`] fronts any [`RandomAccess`] backing store with a small
//! cache of recently fetched ranges. The cache is an optimisation only:
//! reads always return the exact on-disk bytes, and a request extending past
//! the end of the store is reported as a format error (truncation).

use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::config::Config;
use crate::constants::READ_CACHE_FACTOR;
use crate::error::{LazyError, Result};

/// Seekable byte store a reader session draws from.
pub trait RandomAccess: Send {
    /// Fills `buf` from `offset`. The range is known to be in bounds.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Total length of the store in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// File-backed store.
pub struct FileSource {
    file: fs_err::File,
    len: u64,
}

impl FileSource {
    /// Opens `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = fs_err::File::open(path).map_err(|e| LazyError::io_at(e, path))?;
        let len = file
            .metadata()
            .map_err(|e| LazyError::io_at(e, path))?
            .len();
        Ok(Self { file, len })
    }
}

impl RandomAccess for FileSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// In-memory store, used by tests and for reading already-loaded blobs.
pub struct BytesSource {
    data: Vec<u8>,
}

impl BytesSource {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl RandomAccess for BytesSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        let slice = self
            .data
            .get(start..end)
            .ok_or_else(|| LazyError::format("read past end of blob"))?;
        buf.copy_from_slice(slice);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Byte-accounting counters, exposed for cost verification in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Number of physical reads issued to the backing store.
    pub physical_reads: u64,
    /// Total bytes fetched from the backing store.
    pub bytes_fetched: u64,
}

struct CachedRange {
    start: u64,
    bytes: Vec<u8>,
}

impl CachedRange {
    fn contains(&self, offset: u64, len: usize) -> bool {
        offset >= self.start && offset + len as u64 <= self.start + self.bytes.len() as u64
    }
}

/// Bounded range cache over a [`RandomAccess`] store.
pub struct BufferedSource {
    inner: Box<dyn RandomAccess>,
    ranges: VecDeque<CachedRange>,
    cached_bytes: usize,
    read_buffer: usize,
    stats: ReadStats,
}

impl BufferedSource {
    pub fn new(inner: Box<dyn RandomAccess>, config: &Config) -> Self {
        Self {
            inner,
            ranges: VecDeque::new(),
            cached_bytes: 0,
            read_buffer: config.read_buffer.max(1),
            stats: ReadStats::default(),
        }
    }

    /// Total length of the underlying store.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Counters accumulated since the source was created.
    #[must_use]
    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Reads `len` bytes at `offset`, serving from cache when possible.
    pub fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.check_bounds(offset, len as u64)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        if let Some(range) = self.ranges.iter().find(|r| r.contains(offset, len)) {
            let lo = (offset - range.start) as usize;
            return Ok(range.bytes[lo..lo + len].to_vec());
        }

        // Physical read of at least `read_buffer` bytes, clamped to EOF.
        let available = (self.inner.len() - offset) as usize;
        let fetch_len = len.max(self.read_buffer).min(available);
        let mut bytes = vec![0u8; fetch_len];
        self.inner.read_at(offset, &mut bytes)?;
        self.stats.physical_reads += 1;
        self.stats.bytes_fetched += fetch_len as u64;

        let out = bytes[..len].to_vec();
        self.cached_bytes += bytes.len();
        self.ranges.push_back(CachedRange {
            start: offset,
            bytes,
        });
        self.evict();
        Ok(out)
    }

    /// Streams `[offset, offset + len)` into `sink` in `chunk`-sized pieces
    /// without touching the cache. Used by the combiner's bulk payload copy.
    pub fn copy_to(
        &mut self,
        offset: u64,
        len: u64,
        chunk: usize,
        sink: &mut dyn std::io::Write,
    ) -> Result<()> {
        self.check_bounds(offset, len)?;
        let chunk = chunk.max(1);
        let mut remaining = len;
        let mut cursor = offset;
        let mut buf = vec![0u8; chunk.min(usize::try_from(len).unwrap_or(chunk))];
        while remaining > 0 {
            let step = usize::try_from(remaining.min(buf.len() as u64)).unwrap_or(buf.len());
            let slice = &mut buf[..step];
            self.inner.read_at(cursor, slice)?;
            self.stats.physical_reads += 1;
            self.stats.bytes_fetched += step as u64;
            sink.write_all(slice)?;
            cursor += step as u64;
            remaining -= step as u64;
        }
        Ok(())
    }

    fn check_bounds(&self, offset: u64, len: u64) -> Result<()> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| LazyError::format("read range overflows"))?;
        if end > self.inner.len() {
            return Err(LazyError::format("read past end of blob"));
        }
        Ok(())
    }

    fn evict(&mut self) {
        let limit = self.read_buffer.saturating_mul(READ_CACHE_FACTOR);
        while self.cached_bytes > limit && self.ranges.len() > 1 {
            if let Some(dropped) = self.ranges.pop_front() {
                self.cached_bytes -= dropped.bytes.len();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with(read_buffer: usize, data: Vec<u8>) -> BufferedSource {
        let config = Config {
            read_buffer,
            ..Config::default()
        };
        BufferedSource::new(Box::new(BytesSource::new(data)), &config)
    }

    #[test]
    fn cached_read_issues_one_physical_read() {
        let data: Vec<u8> = (0..=255).collect();
        let mut source = source_with(64, data.clone());
        let first = source.read(10, 4).expect("read");
        assert_eq!(first, &data[10..14]);
        // Served from the 64-byte range fetched above.
        let second = source.read(20, 16).expect("read");
        assert_eq!(second, &data[20..36]);
        assert_eq!(source.stats().physical_reads, 1);
        assert_eq!(source.stats().bytes_fetched, 64);
    }

    #[test]
    fn short_tail_read_clamps_to_eof() {
        let data: Vec<u8> = (0..100).collect();
        let mut source = source_with(64, data.clone());
        let tail = source.read(90, 10).expect("read");
        assert_eq!(tail, &data[90..]);
        assert_eq!(source.stats().bytes_fetched, 10);
    }

    #[test]
    fn read_past_eof_is_a_format_error() {
        let mut source = source_with(16, vec![0u8; 8]);
        let err = source.read(4, 8).expect_err("past eof");
        assert!(matches!(err, LazyError::Format { .. }));
    }

    #[test]
    fn eviction_keeps_cache_bounded() {
        let data = vec![7u8; 4096];
        let mut source = source_with(16, data);
        for i in 0..32 {
            source.read(i * 128, 16).expect("read");
        }
        assert!(source.cached_bytes <= 16 * READ_CACHE_FACTOR);
        // Evicted ranges must be refetched, never misread.
        let again = source.read(0, 16).expect("read");
        assert_eq!(again, vec![7u8; 16]);
    }

    #[test]
    fn copy_to_streams_in_chunks() {
        let data: Vec<u8> = (0..=255).cycle().take(1000).map(|v| v as u8).collect();
        let mut source = source_with(64, data.clone());
        let mut out = Vec::new();
        source.copy_to(100, 500, 128, &mut out).expect("copy");
        assert_eq!(out, &data[100..600]);
        assert_eq!(source.stats().physical_reads, 4);
    }
}
