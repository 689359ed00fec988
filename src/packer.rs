//! Single-pass packer: payload stream-out plus TOC capture.
//!
//! The payload is produced by one depth-first traversal of the input tree.
//! Byte offsets are captured through a counting writer layered over a
//! buffered writer, so every node's `[start, end)` range is known the moment
//! its encoding finishes. The TOC is retained in memory and written as the
//! trailer, after which the header is patched in place.

use std::collections::HashSet;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::codec::{Codec, MsgpackCodec};
use crate::config::{Config, config};
use crate::constants::{HEADER_SIZE, MAGIC, PAYLOAD_ORIGIN};
use crate::error::{LazyError, Result};
use crate::guard::SessionGuard;
use crate::header::{BlobHeader, HeaderCodec};
use crate::toc::{GroupBlock, TocChildren, TocNode};
use crate::value::Value;

/// Packs `value` into `writer` using the global configuration.
pub fn pack<W: Write + Seek>(value: &Value, writer: &mut W) -> Result<()> {
    pack_with(value, writer, &config())
}

/// Packs `value` into `writer` with an explicit configuration.
pub fn pack_with<W: Write + Seek>(value: &Value, writer: &mut W, config: &Config) -> Result<()> {
    let _guard = SessionGuard::acquire("packer");
    let codec = MsgpackCodec;
    run_pack(writer, config, |session, out| {
        session.encode_node(value, out)
    }, &codec)
}

/// Packs `value` into a freshly created file at `path`.
///
/// The file is written in place; callers that need atomicity should pack to
/// a temporary path and rename.
pub fn pack_file(value: &Value, path: impl AsRef<Path>) -> Result<()> {
    pack_file_with(value, path, &config())
}

/// [`pack_file`] with an explicit configuration.
pub fn pack_file_with(value: &Value, path: impl AsRef<Path>, config: &Config) -> Result<()> {
    let path = path.as_ref();
    let mut file = fs_err::File::create(path).map_err(|e| LazyError::io_at(e, path))?;
    pack_with(value, &mut file, config)
}

/// Packs a map produced by a streaming source of known length.
///
/// The declared `len` is read exactly once; the producer must yield exactly
/// that many pairs or the pack fails with
/// [`LazyError::EncodeCountMismatch`], leaving a partial file behind.
pub fn pack_map_stream<W, I>(len: usize, entries: I, writer: &mut W) -> Result<()>
where
    W: Write + Seek,
    I: IntoIterator<Item = (String, Value)>,
{
    pack_map_stream_with(len, entries, writer, &config())
}

/// [`pack_map_stream`] with an explicit configuration.
pub fn pack_map_stream_with<W, I>(
    len: usize,
    entries: I,
    writer: &mut W,
    config: &Config,
) -> Result<()>
where
    W: Write + Seek,
    I: IntoIterator<Item = (String, Value)>,
{
    let _guard = SessionGuard::acquire("packer");
    let codec = MsgpackCodec;
    let mut iter = entries.into_iter();
    run_pack(
        writer,
        config,
        |session, out| session.encode_map_stream(len, &mut iter, out),
        &codec,
    )
}

fn run_pack<W, F>(writer: &mut W, config: &Config, encode_root: F, codec: &dyn Codec) -> Result<()>
where
    W: Write + Seek,
    F: FnOnce(&PackSession<'_>, &mut CountingWriter<BufWriter<&mut W>>) -> Result<TocNode>,
{
    writer.seek(SeekFrom::Start(0))?;
    writer.write_all(&MAGIC)?;
    writer.write_all(&[0u8; HEADER_SIZE])?;

    let session = PackSession { config, codec };
    let (payload_len, toc_len) = {
        let buffered = BufWriter::with_capacity(config.write_buffer.max(1), &mut *writer);
        let mut out = CountingWriter::new(buffered);
        let root = encode_root(&session, &mut out)?;
        let payload_len = out.position();
        let toc_bytes = root.encode(codec)?;
        out.write_all(&toc_bytes)?;
        out.flush()?;
        (payload_len, toc_bytes.len() as u64)
    };

    let header = BlobHeader {
        toc_start: PAYLOAD_ORIGIN + payload_len,
        toc_len,
    };
    HeaderCodec::write(writer, &header)?;
    writer.flush()?;
    debug!(payload_len, toc_len, "packed blob");
    Ok(())
}

struct PackSession<'a> {
    config: &'a Config,
    codec: &'a dyn Codec,
}

impl PackSession<'_> {
    fn encode_node<W: Write>(&self, value: &Value, out: &mut CountingWriter<W>) -> Result<TocNode> {
        let start = out.position();
        match value {
            Value::Seq(items) => {
                self.codec.write_seq_header(items.len(), out)?;
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    children.push(self.encode_node(item, out)?);
                }
                Ok(self.finish_seq(start, out.position(), children))
            }
            Value::Map(pairs) => {
                check_unique_keys(pairs)?;
                self.codec.write_map_header(pairs.len(), out)?;
                let mut children = Vec::with_capacity(pairs.len());
                for (key, item) in pairs {
                    self.codec.write_key(key, out)?;
                    children.push((key.clone(), self.encode_node(item, out)?));
                }
                Ok(self.finish_map(start, out.position(), children))
            }
            scalar => {
                self.codec.encode(scalar, out)?;
                Ok(TocNode::leaf(start, out.position()))
            }
        }
    }

    fn encode_map_stream<W, I>(
        &self,
        len: usize,
        iter: &mut I,
        out: &mut CountingWriter<W>,
    ) -> Result<TocNode>
    where
        W: Write,
        I: Iterator<Item = (String, Value)>,
    {
        let start = out.position();
        self.codec.write_map_header(len, out)?;
        let mut seen = HashSet::with_capacity(len.min(4096));
        let mut children = Vec::with_capacity(len.min(4096));
        for produced in 0..len {
            let Some((key, value)) = iter.next() else {
                return Err(LazyError::EncodeCountMismatch {
                    declared: len as u64,
                    actual: produced as u64,
                });
            };
            if !seen.insert(key.clone()) {
                return Err(LazyError::encode(format!("duplicate map key '{key}'")));
            }
            self.codec.write_key(&key, out)?;
            let node = self.encode_node(&value, out)?;
            children.push((key, node));
        }
        if iter.next().is_some() {
            return Err(LazyError::EncodeCountMismatch {
                declared: len as u64,
                actual: len as u64 + 1,
            });
        }
        Ok(self.finish_map(start, out.position(), children))
    }

    /// Applies the TOC shape rules to a finished sequence encoding.
    fn finish_seq(&self, start: u64, end: u64, children: Vec<TocNode>) -> TocNode {
        if (end - start) < self.config.small_obj_threshold as u64 {
            return TocNode::leaf(start, end);
        }
        let trivial = self.config.trivial_size as u64;
        if children.len() > 1 && children.iter().all(|c| c.byte_len() <= trivial) {
            let blocks = self.group_blocks(&children);
            return TocNode {
                start,
                end,
                children: Some(TocChildren::Grouped(blocks)),
            };
        }
        if children.iter().all(TocNode::is_leaf) {
            return TocNode::leaf(start, end);
        }
        TocNode {
            start,
            end,
            children: Some(TocChildren::Positional(children)),
        }
    }

    /// Applies the TOC shape rules to a finished map encoding.
    fn finish_map(&self, start: u64, end: u64, children: Vec<(String, TocNode)>) -> TocNode {
        if (end - start) < self.config.small_obj_threshold as u64 {
            return TocNode::leaf(start, end);
        }
        if children.iter().all(|(_, c)| c.is_leaf()) {
            return TocNode::leaf(start, end);
        }
        TocNode {
            start,
            end,
            children: Some(TocChildren::Keyed(children)),
        }
    }

    /// Greedy partition: a block closes as soon as its cumulative size meets
    /// the small-object threshold, so blocks land slightly over rather than
    /// under. The final block takes whatever remains.
    fn group_blocks(&self, children: &[TocNode]) -> Vec<GroupBlock> {
        let threshold = self.config.small_obj_threshold as u64;
        let mut blocks = Vec::new();
        let mut block_start: Option<u64> = None;
        let mut count = 0u64;
        for child in children {
            let start = *block_start.get_or_insert(child.start);
            count += 1;
            if child.end - start >= threshold {
                blocks.push(GroupBlock {
                    count,
                    start,
                    end: child.end,
                });
                block_start = None;
                count = 0;
            }
        }
        if let Some(start) = block_start {
            let end = children
                .last()
                .map_or(start, |c| c.end);
            blocks.push(GroupBlock { count, start, end });
        }
        blocks
    }
}

fn check_unique_keys(pairs: &[(String, Value)]) -> Result<()> {
    let mut seen = HashSet::with_capacity(pairs.len());
    for (key, _) in pairs {
        if !seen.insert(key.as_str()) {
            return Err(LazyError::encode(format!("duplicate map key '{key}'")));
        }
    }
    Ok(())
}

/// Write adapter that tracks how many bytes have passed through.
struct CountingWriter<W: Write> {
    inner: W,
    pos: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, pos: 0 }
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.pos += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
