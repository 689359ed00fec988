use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LazyError>;

/// Canonical error surface for lazymsg.
#[derive(Debug, Error)]
pub enum LazyError {
    #[error("I/O error: {source}")]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    #[error("Malformed blob: {reason}")]
    Format { reason: Cow<'static, str> },

    #[error("MessagePack decoding failed: {reason}")]
    Decode { reason: Cow<'static, str> },

    #[error("MessagePack encoding failed: {reason}")]
    Encode { reason: Cow<'static, str> },

    #[error("Streaming map declared {declared} pairs but the producer yielded {actual}")]
    EncodeCountMismatch { declared: u64, actual: u64 },

    #[error("Key '{key}' was not found")]
    KeyNotFound { key: String },

    #[error("Index {index} is out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Type mismatch: expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Combine inputs mix named and unnamed entries")]
    CombineNameMix,

    #[error("Session is closed")]
    SessionClosed,
}

impl LazyError {
    pub(crate) fn format(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub(crate) fn encode(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Encode {
            reason: reason.into(),
        }
    }

    pub(crate) fn io_at(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }
}

impl From<std::io::Error> for LazyError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }
}
