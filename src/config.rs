//! Process-wide configuration record for packers, readers and the combiner.
//!
//! Sessions snapshot the global record at construction time; every session
//! constructor also has a `*_with` variant taking an explicit [`Config`] for
//! callers that avoid global state.

use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::constants::{
    DEFAULT_COPY_CHUNK, DEFAULT_FAST_LOAD_THRESHOLD, DEFAULT_READ_BUFFER,
    DEFAULT_SMALL_OBJ_THRESHOLD, DEFAULT_TRIVIAL_SIZE, DEFAULT_WRITE_BUFFER,
};

/// Immutable per-session configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Containers whose encoded length is below this are stored opaquely.
    pub small_obj_threshold: usize,
    /// Elements encoded in at most this many bytes are eligible for grouped blocks.
    pub trivial_size: usize,
    /// Size of the packer's buffered writer.
    pub write_buffer: usize,
    /// Read cache watermark and minimum physical read size.
    pub read_buffer: usize,
    /// Enables whole-range materialisation in `to_plain`.
    pub fast_load: bool,
    /// Accessed fraction in `[0, 1]` at which `to_plain` switches to per-child reads.
    pub fast_load_threshold: f64,
    /// Combiner payload copy granularity.
    pub copy_chunk: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            small_obj_threshold: DEFAULT_SMALL_OBJ_THRESHOLD,
            trivial_size: DEFAULT_TRIVIAL_SIZE,
            write_buffer: DEFAULT_WRITE_BUFFER,
            read_buffer: DEFAULT_READ_BUFFER,
            fast_load: true,
            fast_load_threshold: DEFAULT_FAST_LOAD_THRESHOLD,
            copy_chunk: DEFAULT_COPY_CHUNK,
        }
    }
}

static GLOBAL: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

/// Replaces the global configuration used by subsequently created sessions.
pub fn configure(config: Config) {
    let mut cell = GLOBAL.write().unwrap_or_else(|e| e.into_inner());
    *cell = config;
}

/// Returns a snapshot of the current global configuration.
#[must_use]
pub fn config() -> Config {
    GLOBAL.read().unwrap_or_else(|e| e.into_inner()).clone()
}
