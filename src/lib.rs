//! Lazy, partial decoding of nested MessagePack trees from a single
//! self-describing file.
//!
//! A producer packs a tree of maps, sequences and primitives once; consumers
//! later open the blob and read only the sub-tree they need, paying decode
//! and I/O cost proportional to the accessed slice rather than to the file
//! size.
//!
//! # Blob format
//!
//! ```text
//! +-----------+---------------+----------------------+----------------+
//! | MAGIC (4) | HEADER (20 B) |  PAYLOAD (variable)  |  ENCODED TOC   |
//! +-----------+---------------+----------------------+----------------+
//! ```
//!
//! - `MAGIC`: the bytes `b"LZMG"` at offset 0.
//! - `HEADER`: 20 bytes. Bytes 0..8 hold `toc_start` (u64, little-endian,
//!   absolute file offset), bytes 8..16 hold `toc_len` (u64, little-endian),
//!   bytes 16..20 are reserved and written as zero. Every fixed-width
//!   integer outside MessagePack is little-endian; this is part of the
//!   format contract.
//! - `PAYLOAD`: raw MessagePack encoding of the root value, starting at
//!   offset 24. All TOC positions are relative to this origin.
//! - `ENCODED TOC`: a MessagePack map per node using the wire keys `"p"`
//!   (position pair `[start, end]`, end exclusive) and, for expanded
//!   containers, `"t"` (a map of child nodes for keyed tables, an array of
//!   node maps for positional tables, or an array of `[count, start, end]`
//!   triples for grouped tables).
//!
//! # Example
//!
//! ```no_run
//! use lazymsg::{Value, pack_file, open_reader};
//!
//! # fn main() -> lazymsg::Result<()> {
//! let tree = Value::Map(vec![
//!     ("a".to_string(), Value::Seq(vec![Value::Int(1), Value::Int(2)])),
//!     ("b".to_string(), Value::Str("hello".to_string())),
//! ]);
//! pack_file(&tree, "tree.lzmg")?;
//!
//! let reader = open_reader("tree.lzmg")?;
//! let second = reader.read_path("a/1")?.to_plain()?;
//! assert_eq!(second, Value::Int(2));
//! reader.close();
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod combine;
pub mod config;
pub mod constants;
pub mod error;
pub mod guard;
pub mod header;
pub mod lazy;
pub mod packer;
pub mod path;
pub mod reader;
pub mod source;
pub mod toc;
pub mod value;

pub use codec::{Codec, MsgpackCodec, default_codec};
pub use combine::{FileRef, combine, combine_with};
pub use config::{Config, config, configure};
pub use error::{LazyError, Result};
pub use guard::active_sessions;
pub use header::BlobHeader;
pub use lazy::{LazyMap, LazySeq, LazyValue, to_plain};
pub use packer::{
    pack, pack_file, pack_file_with, pack_map_stream, pack_map_stream_with, pack_with,
};
pub use path::{IntoPath, PathSeg};
pub use reader::{OpenOptions, ReaderSession, open_bytes, open_reader, open_reader_with, open_source};
pub use source::{BufferedSource, BytesSource, FileSource, RandomAccess, ReadStats};
pub use toc::{GroupBlock, TocChildren, TocNode};
pub use value::Value;
