//! Error types for every failure domain in respak.
//!
//! The crate distinguishes three broad outcomes when touching a resource
//! file:
//!
//! - **I/O and content failures** ([`RespakError::Io`], [`RespakError::Codec`],
//!   [`RespakError::Corrupt`]): the byte stream, the block codec, or the file
//!   content itself let us down.
//! - **Version triage** ([`RespakError::WrongVersion`]): the file is a respak
//!   container but cannot be loaded by this reader: opposite endianness, a
//!   different root structure size, or a different resource version.
//! - **Foreign data** ([`RespakError::UnknownFileType`]): no plausible header
//!   match at all.
//!
//! Structural invariants the *writer* must obey (pack flag compatibility,
//! local-offset bounds, pointee counts) are debug assertions, not errors:
//! they indicate caller misuse, not file problems.
//!
//! The error type is `Clone`; I/O errors are wrapped in an `Arc` to keep
//! cloning cheap.

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for respak operations.
pub type Result<T> = std::result::Result<T, RespakError>;

/// The master error enum covering all failure domains.
#[derive(Debug, Clone)]
pub enum RespakError {
    /// Low-level I/O failure from the byte stream (disk full, permissions,
    /// truncated read, ...).
    Io(Arc<io::Error>),

    /// The block codec rejected its input while compressing or
    /// decompressing.
    ///
    /// Note that an *incompressible* block is not an error: the save engine
    /// recovers by storing the block verbatim.
    Codec(String),

    /// The file content is implausible: sizes that do not add up, a ref
    /// pointing outside its pack, a pack payload that decompresses to the
    /// wrong length.
    Corrupt(String),

    /// The file is a respak container but was written for a different
    /// reader: opposite endianness, another root structure size
    /// (`auto_version`), or another resource version.
    WrongVersion(&'static str),

    /// The header matches no known format revision, byte-swapped or not.
    /// Could be an older format version, could be an unrelated file.
    UnknownFileType,
}

impl fmt::Display for RespakError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Codec(s) => write!(f, "codec error: {s}"),
            Self::Corrupt(s) => write!(f, "corrupt container: {s}"),
            Self::WrongVersion(s) => write!(f, "wrong version: {s}"),
            Self::UnknownFileType => write!(f, "unknown file type"),
        }
    }
}

impl std::error::Error for RespakError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RespakError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

