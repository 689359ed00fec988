//! Splices already-packed blobs into one packed blob.
//!
//! Payload bytes are copied verbatim in configurable chunks; nothing is
//! re-encoded. Each input's TOC is grafted into the combined TOC with every
//! position shifted by the input's base offset in the new payload region.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec::{Codec, MsgpackCodec};
use crate::config::{Config, config};
use crate::constants::{HEADER_SIZE, MAGIC, PAYLOAD_ORIGIN};
use crate::error::{LazyError, Result};
use crate::guard::SessionGuard;
use crate::header::{BlobHeader, HeaderCodec};
use crate::source::{BufferedSource, FileSource};
use crate::toc::{TocChildren, TocNode};

/// One combine input: a packed blob and, optionally, the key it should live
/// under in the combined blob.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub path: PathBuf,
    pub name: Option<String>,
}

impl FileRef {
    /// Unnamed entry for a positional combination.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
        }
    }

    /// Named entry for a keyed combination.
    pub fn named(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: Some(name.into()),
        }
    }
}

/// Combines `inputs` into a new packed blob at `output`.
///
/// If every input is named the result's top level is a map; if none is, a
/// sequence; anything in between is [`LazyError::CombineNameMix`].
pub fn combine(output: impl AsRef<Path>, inputs: &[FileRef]) -> Result<()> {
    combine_with(output, inputs, &config())
}

/// [`combine`] with an explicit configuration.
pub fn combine_with(output: impl AsRef<Path>, inputs: &[FileRef], config: &Config) -> Result<()> {
    let _guard = SessionGuard::acquire("combiner");
    let codec = MsgpackCodec;
    let keyed = check_naming(inputs)?;

    let mut opened = Vec::with_capacity(inputs.len());
    for input in inputs {
        opened.push(open_input(input, config)?);
    }

    let output_path = output.as_ref();
    let file =
        fs_err::File::create(output_path).map_err(|e| LazyError::io_at(e, output_path))?;
    let mut writer = BufWriter::with_capacity(config.write_buffer.max(1), file);
    writer.write_all(&MAGIC)?;
    writer.write_all(&[0u8; HEADER_SIZE])?;

    let mut payload_pos = 0u64;
    if keyed {
        codec.write_map_header(opened.len(), &mut count_to(&mut writer, &mut payload_pos))?;
    } else {
        codec.write_seq_header(opened.len(), &mut count_to(&mut writer, &mut payload_pos))?;
    }

    let mut keyed_children = Vec::new();
    let mut positional_children = Vec::new();
    for (input, source) in inputs.iter().zip(opened.iter_mut()) {
        if let Some(name) = &input.name {
            codec.write_key(name, &mut count_to(&mut writer, &mut payload_pos))?;
        }
        let base = payload_pos;
        let payload_len = source.header.payload_len();
        source.source.copy_to(
            PAYLOAD_ORIGIN,
            payload_len,
            config.copy_chunk,
            &mut count_to(&mut writer, &mut payload_pos),
        )?;
        let mut grafted = source.toc.clone();
        grafted.shift(base);
        debug!(
            input = %input.path.display(),
            base,
            payload_len,
            "spliced combine input"
        );
        match &input.name {
            Some(name) => keyed_children.push((name.clone(), grafted)),
            None => positional_children.push(grafted),
        }
    }

    let children = if keyed {
        TocChildren::Keyed(keyed_children)
    } else {
        TocChildren::Positional(positional_children)
    };
    let root = TocNode {
        start: 0,
        end: payload_pos,
        children: Some(children),
    };
    let toc_bytes = root.encode(&codec)?;
    writer.write_all(&toc_bytes)?;
    writer.flush()?;

    let mut file = writer
        .into_inner()
        .map_err(|e| LazyError::io_at(e.into_error(), output_path))?;
    let header = BlobHeader {
        toc_start: PAYLOAD_ORIGIN + payload_pos,
        toc_len: toc_bytes.len() as u64,
    };
    HeaderCodec::write(&mut file, &header)?;
    file.flush()?;
    debug!(
        output = %output_path.display(),
        inputs = inputs.len(),
        payload_len = payload_pos,
        "combined blobs"
    );
    Ok(())
}

fn check_naming(inputs: &[FileRef]) -> Result<bool> {
    let named = inputs.iter().filter(|r| r.name.is_some()).count();
    if named != 0 && named != inputs.len() {
        return Err(LazyError::CombineNameMix);
    }
    // Duplicate names would shadow each other in the combined map.
    if named != 0 {
        for (index, input) in inputs.iter().enumerate() {
            if inputs[..index]
                .iter()
                .any(|other| other.name == input.name)
            {
                return Err(LazyError::encode(format!(
                    "duplicate combine name '{}'",
                    input.name.as_deref().unwrap_or_default()
                )));
            }
        }
    }
    Ok(named != 0 && !inputs.is_empty())
}

struct CombineInput {
    source: BufferedSource,
    header: BlobHeader,
    toc: TocNode,
}

fn open_input(input: &FileRef, config: &Config) -> Result<CombineInput> {
    let file = FileSource::open(&input.path)?;
    let mut source = BufferedSource::new(Box::new(file), config);
    let prefix = source.read(0, PAYLOAD_ORIGIN as usize)?;
    let header = HeaderCodec::parse_prefix(&prefix)?;
    let toc_len = usize::try_from(header.toc_len)
        .map_err(|_| LazyError::format("TOC length overflows"))?;
    let toc_bytes = source.read(header.toc_start, toc_len)?;
    let toc = TocNode::decode(&MsgpackCodec, &toc_bytes)?;
    toc.validate(header.payload_len())?;
    Ok(CombineInput {
        source,
        header,
        toc,
    })
}

/// Borrowing write adapter that advances an external payload counter.
fn count_to<'a, W: Write>(writer: &'a mut W, pos: &'a mut u64) -> CountTo<'a, W> {
    CountTo { writer, pos }
}

struct CountTo<'a, W: Write> {
    writer: &'a mut W,
    pos: &'a mut u64,
}

impl<W: Write> Write for CountTo<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.writer.write(buf)?;
        *self.pos += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
