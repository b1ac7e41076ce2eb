//! Public facade: configured save/load entry points.
//!
//! [`Respak`] is a small builder holding the knobs a save or load needs:
//! compression level, root pack flags, endian swap, memory handler. The
//! one-shot associated functions cover the common case.
//!
//! ```rust,ignore
//! // One-shot, defaults everywhere.
//! Respak::save("boss_arena.pak", &level)?;
//! let level = unsafe { Respak::load::<LevelData, _>("boss_arena.pak")? };
//!
//! // Configured.
//! let respak = Respak::builder()
//!     .level(CompressionLevel::High)
//!     .handler(&engine_allocator);
//! respak.save_path("boss_arena.pak", &level)?;
//! ```

use std::path::Path;

use crate::codec::CompressionLevel;
use crate::error::Result;
use crate::format::MemType;
use crate::io::{ByteStream, IoStream};
use crate::loader::{load_root, Loaded};
use crate::memory::{MemoryHandler, SYSTEM_MEMORY};
use crate::saver::save_root;
use crate::serial::Serial;

/// Save/load configuration.
///
/// The lifetime is the memory handler's borrow; the default configuration
/// uses the library's [`SYSTEM_MEMORY`] and is `'static`.
#[derive(Clone, Copy)]
pub struct Respak<'h> {
    level: CompressionLevel,
    root_flags: MemType,
    swap_endian: bool,
    handler: &'h dyn MemoryHandler,
}

impl Respak<'static> {
    /// Default configuration: medium compression, plain root flags,
    /// native endianness, system memory.
    pub fn new() -> Self {
        Self {
            level: CompressionLevel::default(),
            root_flags: MemType::NONE,
            swap_endian: false,
            handler: &SYSTEM_MEMORY,
        }
    }

    /// Alias for [`new`](Self::new), reading better at a call site that
    /// goes on to configure.
    pub fn builder() -> Self {
        Self::new()
    }

    /// Saves `root` to a fresh file with the default configuration.
    pub fn save<T: Serial, P: AsRef<Path>>(path: P, root: &T) -> Result<()> {
        Self::new().save_path(path, root)
    }

    /// Loads a resource from a file with the default configuration.
    ///
    /// # Safety
    ///
    /// See [`load_stream`](Self::load_stream).
    pub unsafe fn load<T: Serial, P: AsRef<Path>>(path: P) -> Result<Loaded<'static, T>> {
        Self::new().load_path(path)
    }
}

impl Default for Respak<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'h> Respak<'h> {
    /// Sets the compression level.
    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the memory flags of the root pack. Children inherit
    /// constraints from these: a `UNIQUE` root demands `UNIQUE` children,
    /// a `TEMP` root demands `TEMP` children.
    pub fn root_flags(mut self, flags: MemType) -> Self {
        self.root_flags = flags;
        self
    }

    /// Writes the header and info region for the opposite endianness.
    ///
    /// Pack payload bytes are *not* converted; they always stay in the
    /// writer's native order. A swapped file encodes its structural
    /// metadata for the opposite host and trusts that host's descriptors
    /// to reinterpret payload bytes; this side refuses to load it
    /// (`WrongVersion`).
    pub fn swap_endian(mut self, swap: bool) -> Self {
        self.swap_endian = swap;
        self
    }

    /// Replaces the memory handler used for pack allocations at load.
    pub fn handler<'n>(self, handler: &'n dyn MemoryHandler) -> Respak<'n> {
        Respak {
            level: self.level,
            root_flags: self.root_flags,
            swap_endian: self.swap_endian,
            handler,
        }
    }

    /// Saves `root` onto the stream at its current position.
    pub fn save_stream<T: Serial, S: ByteStream>(&self, stream: &mut S, root: &T) -> Result<()> {
        save_root(stream, root, self.level, self.root_flags, self.swap_endian)
    }

    /// Saves `root` to a fresh file at `path`.
    pub fn save_path<T: Serial, P: AsRef<Path>>(&self, path: P, root: &T) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut stream = IoStream::new(file);
        self.save_stream(&mut stream, root)
    }

    /// Loads a resource from the stream at its current position.
    ///
    /// # Safety
    ///
    /// The stream must hold a container produced by a save of the same
    /// root type `T`: same layout, matching pointer width. The header
    /// triage catches size, version and endianness drift, but cannot
    /// detect a relayout that kept `size_of::<T>()` and `T::VERSION`
    /// unchanged; loading such a file is undefined behavior.
    pub unsafe fn load_stream<T: Serial, S: ByteStream>(
        &self,
        stream: &mut S,
    ) -> Result<Loaded<'h, T>> {
        load_root(stream, self.handler)
    }

    /// Loads a resource from a file. Uses a memory-mapped source when the
    /// `mmap` feature is enabled, a buffered file read otherwise.
    ///
    /// # Safety
    ///
    /// See [`load_stream`](Self::load_stream).
    pub unsafe fn load_path<T: Serial, P: AsRef<Path>>(&self, path: P) -> Result<Loaded<'h, T>> {
        #[cfg(feature = "mmap")]
        {
            let mut stream = crate::io::MappedStream::open(path)?;
            self.load_stream(&mut stream)
        }
        #[cfg(not(feature = "mmap"))]
        {
            let file = std::fs::File::open(path)?;
            let mut stream = IoStream::new(file);
            self.load_stream(&mut stream)
        }
    }
}

impl std::fmt::Debug for Respak<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Respak")
            .field("level", &self.level)
            .field("root_flags", &self.root_flags)
            .field("swap_endian", &self.swap_endian)
            .finish_non_exhaustive()
    }
}
