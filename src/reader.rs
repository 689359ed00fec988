//! Reader sessions: open a blob, resolve paths, hand out lazy cursors.
//!
//! Opening validates the magic and header only; the TOC is fetched, decoded
//! and validated on first access and memoised for the life of the session.
//! Cursors share the session's source and TOC; closing the session (or
//! dropping it) invalidates every cursor derived from it.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::codec::{Codec, default_codec};
use crate::config::{Config, config};
use crate::constants::PAYLOAD_ORIGIN;
use crate::error::{LazyError, Result};
use crate::guard::SessionGuard;
use crate::header::{BlobHeader, HeaderCodec};
use crate::lazy::{LazyValue, descend_plain, materialise};
use crate::path::{IntoPath, PathSeg};
use crate::source::{BufferedSource, BytesSource, FileSource, RandomAccess, ReadStats};
use crate::toc::{TocChildren, TocNode};

/// Options for [`open_reader_with`].
pub struct OpenOptions {
    /// Enables per-cursor decoded-value caches.
    pub cached: bool,
    /// Codec used for every decode in the session.
    pub codec: Arc<dyn Codec>,
    /// Configuration snapshot for the session.
    pub config: Config,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            cached: true,
            codec: default_codec(),
            config: config(),
        }
    }
}

/// Opens a blob file with default options.
pub fn open_reader(path: impl AsRef<Path>) -> Result<ReaderSession> {
    open_reader_with(path, OpenOptions::default())
}

/// Opens a blob file with explicit options.
pub fn open_reader_with(path: impl AsRef<Path>, options: OpenOptions) -> Result<ReaderSession> {
    let source = FileSource::open(path.as_ref())?;
    let session = open_source(Box::new(source), options)?;
    debug!(path = %path.as_ref().display(), "opened reader session");
    Ok(session)
}

/// Opens an in-memory blob.
pub fn open_bytes(blob: Vec<u8>) -> Result<ReaderSession> {
    open_source(Box::new(BytesSource::new(blob)), OpenOptions::default())
}

/// Opens any random-access store. This is the constructor instrumented
/// tests use to observe physical read behaviour.
pub fn open_source(source: Box<dyn RandomAccess>, options: OpenOptions) -> Result<ReaderSession> {
    let mut buffered = BufferedSource::new(source, &options.config);
    let prefix = buffered.read(0, PAYLOAD_ORIGIN as usize)?;
    let header = HeaderCodec::parse_prefix(&prefix)?;
    let inner = SessionInner {
        source: Mutex::new(Some(buffered)),
        header,
        codec: options.codec,
        config: options.config,
        cached: options.cached,
        toc: OnceCell::new(),
        closed: AtomicBool::new(false),
        guard: Mutex::new(Some(SessionGuard::acquire("reader"))),
    };
    Ok(ReaderSession {
        inner: Arc::new(inner),
    })
}

/// A scoped read session over one packed blob.
pub struct ReaderSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for ReaderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSession").finish()
    }
}

impl ReaderSession {
    /// Returns the root: a cursor when the root TOC keeps a child table,
    /// otherwise the fully decoded value.
    pub fn read(&self) -> Result<LazyValue> {
        let toc = self.inner.toc()?;
        materialise(&self.inner, Vec::new(), toc)
    }

    /// Resolves a `/`-separated path or a typed segment list.
    pub fn read_path(&self, path: impl IntoPath) -> Result<LazyValue> {
        let segments = path.into_segments();
        let mut current = self.read()?;
        for segment in segments {
            current = step(current, &segment)?;
        }
        Ok(current)
    }

    /// Convenience lookup of a top-level map key.
    pub fn get(&self, key: &str) -> Result<LazyValue> {
        self.read_path(PathSeg::from(key))
    }

    /// Convenience lookup of a top-level sequence index.
    pub fn get_index(&self, index: usize) -> Result<LazyValue> {
        self.read_path(index)
    }

    /// Closes the session and invalidates every cursor derived from it.
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut source = self.inner.source.lock().unwrap_or_else(|e| e.into_inner());
        *source = None;
        let mut guard = self.inner.guard.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        debug!("closed reader session");
    }

    /// Read counters of the underlying source.
    pub fn stats(&self) -> Result<ReadStats> {
        let source = self.inner.source.lock().unwrap_or_else(|e| e.into_inner());
        source
            .as_ref()
            .map(BufferedSource::stats)
            .ok_or(LazyError::SessionClosed)
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn step(current: LazyValue, segment: &PathSeg) -> Result<LazyValue> {
    match current {
        LazyValue::Map(map) => {
            let key = segment.as_key().ok_or(LazyError::WrongType {
                expected: "string key",
                found: "integer index",
            })?;
            map.get(key)
        }
        LazyValue::Seq(seq) => {
            let index = segment.as_index().ok_or(LazyError::WrongType {
                expected: "integer index",
                found: "string key",
            })?;
            seq.get(index)
        }
        LazyValue::Plain(value) => Ok(LazyValue::Plain(descend_plain(&value, segment)?)),
    }
}

pub(crate) struct SessionInner {
    source: Mutex<Option<BufferedSource>>,
    header: BlobHeader,
    codec: Arc<dyn Codec>,
    config: Config,
    cached: bool,
    toc: OnceCell<TocNode>,
    closed: AtomicBool,
    guard: Mutex<Option<SessionGuard>>,
}

impl SessionInner {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LazyError::SessionClosed);
        }
        Ok(())
    }

    pub(crate) fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn cache_enabled(&self) -> bool {
        self.cached
    }

    /// The memoised TOC, fetched and validated on first use.
    pub(crate) fn toc(&self) -> Result<&TocNode> {
        self.ensure_open()?;
        self.toc.get_or_try_init(|| {
            let len = usize::try_from(self.header.toc_len)
                .map_err(|_| LazyError::format("TOC length overflows"))?;
            let bytes = self.read_absolute(self.header.toc_start, len)?;
            let toc = TocNode::decode(self.codec.as_ref(), &bytes)?;
            toc.validate(self.header.payload_len())?;
            Ok(toc)
        })
    }

    /// Reads a payload-relative byte range.
    pub(crate) fn read_payload(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(end - start)
            .map_err(|_| LazyError::format("payload range overflows"))?;
        self.read_absolute(PAYLOAD_ORIGIN + start, len)
    }

    fn read_absolute(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut source = self.source.lock().unwrap_or_else(|e| e.into_inner());
        let source = source.as_mut().ok_or(LazyError::SessionClosed)?;
        source.read(offset, len)
    }

    /// Walks child indices from the root to a cursor's node.
    pub(crate) fn node_at<'a>(&self, root: &'a TocNode, path: &[usize]) -> Result<&'a TocNode> {
        let mut node = root;
        for &index in path {
            node = match &node.children {
                Some(TocChildren::Keyed(entries)) => {
                    &entries
                        .get(index)
                        .ok_or_else(|| LazyError::format("TOC cursor desynchronised"))?
                        .1
                }
                Some(TocChildren::Positional(nodes)) => nodes
                    .get(index)
                    .ok_or_else(|| LazyError::format("TOC cursor desynchronised"))?,
                _ => return Err(LazyError::format("TOC cursor desynchronised")),
            };
        }
        Ok(node)
    }
}
