/// File magic identifying a lazymsg blob.
pub const MAGIC: [u8; 4] = *b"LZMG";
/// Fixed header size immediately following the magic.
pub const HEADER_SIZE: usize = 20;
/// Absolute file offset at which the payload region begins.
pub const PAYLOAD_ORIGIN: u64 = (MAGIC.len() + HEADER_SIZE) as u64;

/// TOC wire key holding a node's `[start, end]` position pair.
pub const TOC_KEY_POS: &str = "p";
/// TOC wire key holding a node's child table.
pub const TOC_KEY_TABLE: &str = "t";

/// Containers encoded below this many bytes are stored without a child table.
pub const DEFAULT_SMALL_OBJ_THRESHOLD: usize = 8 * 1024;
/// Elements at or below this encoded size may join grouped TOC blocks.
pub const DEFAULT_TRIVIAL_SIZE: usize = 20;
/// Packer output buffer size.
pub const DEFAULT_WRITE_BUFFER: usize = 8 * 1024 * 1024;
/// Read cache watermark and minimum physical read size.
pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;
/// Accessed-children fraction below which `to_plain` fetches the whole range.
pub const DEFAULT_FAST_LOAD_THRESHOLD: f64 = 0.3;
/// Combiner payload copy granularity.
pub const DEFAULT_COPY_CHUNK: usize = 16 * 1024 * 1024;

/// The read cache may hold up to `read_buffer * READ_CACHE_FACTOR` bytes.
pub const READ_CACHE_FACTOR: usize = 4;
