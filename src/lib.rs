//! # respak
//!
//! A load-in-place binary serializer for resource files: meshes, animation
//! sets, level data, lookup tables: large, read-mostly blobs where decode
//! cost dominates loading.
//!
//! ## Overview
//!
//! respak is fundamentally different from field-by-field serialization
//! libraries. The on-disk byte layout *is* the in-memory layout of the root
//! structure and everything it owns: loading is a handful of block copies
//! and decompressions into a handful of allocations, followed by one pass
//! that patches pointers. No per-field parsing, no per-node allocations, no
//! intermediate representation.
//!
//! ### How a save works
//!
//! A user-provided descriptor ([`Serial::describe`]) walks the root value.
//! The engine slices everything reachable into **packs** (groups of
//! allocations that share a memory classification, [`MemType`]) and
//! records a **ref** for every pointer it crosses. Each pack is then
//! block-compressed and the whole thing is written as:
//!
//! ```text
//! ┌───────────────────────────────┐
//! │ Header (22 bytes)             │
//! ├───────────────────────────────┤
//! │ Info region (compressed):     │
//! │   pack table, pointer table,  │
//! │   per-block stored sizes      │
//! ├───────────────────────────────┤
//! │ Pack payloads (compressed)    │
//! └───────────────────────────────┘
//! ```
//!
//! ### How a load works
//!
//! The loader validates the header, decompresses the info region, allocates
//! one buffer per pack through a pluggable [`MemoryHandler`], decompresses
//! the pack payloads with double-buffered read-ahead, and rewrites every
//! pointer slot with the host address of its pointee. The result is a
//! [`Loaded<T>`] handle that dereferences to the root and owns every
//! allocation behind it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use respak::{DataPtr, MemType, Respak, Result, Saver, Serial};
//!
//! #[repr(C)]
//! struct Heightmap {
//!     width: u32,
//!     height: u32,
//!     samples: DataPtr<f32>,
//! }
//!
//! impl Serial for Heightmap {
//!     const VERSION: u16 = 1;
//!
//!     fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
//!         s.serialize(&self.width)?;
//!         s.serialize(&self.height)?;
//!         let count = (self.width * self.height) as usize;
//!         // SAFETY: `samples` points at `count` live floats.
//!         unsafe { s.serialize_ptr(&self.samples, count, MemType::NONE) }
//!     }
//! }
//!
//! # fn demo(map: &Heightmap) -> Result<()> {
//! Respak::save("terrain.pak", map)?;
//! let map = unsafe { Respak::load::<Heightmap, _>("terrain.pak")? };
//! assert_eq!(map.width * map.height, 0x4000);
//! # Ok(())
//! # }
//! ```
//!
//! ## Memory classification
//!
//! Pointees carry a [`MemType`]: `UNIQUE` data gets its own pack (and its
//! own allocation at load), `TEMP` data is grouped into a pack that the
//! loader releases right after the post-load hook (unless the hook claims
//! it), and everything else pools into shared packs by flag equality. Fewer
//! packs means fewer allocations on the loading side, and that is the whole
//! game.
//!
//! ## Endianness
//!
//! `swap_endian` saves convert the header and info-region fields for the
//! opposite host; pack payload bytes always stay writer-native. A loader
//! that sees opposite-endian metadata reports
//! [`WrongVersion`](RespakError::WrongVersion) rather than guessing.
//!
//! ## Safety
//!
//! Save-side descriptors are safe code except for
//! [`Saver::serialize_ptr`], which trusts a raw pointer + count pair. The
//! load entry points are `unsafe fn`: the container must have been saved
//! for the same root type on a matching target. The loader bounds-checks
//! every ref and every block against the pack table, so corrupted files
//! surface as [`RespakError::Corrupt`]. The `unsafe` contract covers
//! layout agreement, not file integrity.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
#[allow(unsafe_code)]
pub mod api;
pub mod codec;
pub mod endian;
pub mod error;
#[allow(unsafe_code)]
pub mod format;
#[allow(unsafe_code)]
pub mod io;
#[allow(unsafe_code)]
pub mod loader;
#[allow(unsafe_code)]
pub mod memory;
pub mod serial;

// --- ENGINE MODULES ---
pub mod pack;
#[allow(unsafe_code)]
pub mod saver;

// --- RE-EXPORTS ---

pub use api::Respak;
pub use codec::CompressionLevel;
pub use error::{RespakError, Result};
pub use format::{DataPtr, MemType};
pub use io::{ByteStream, IoStream};
#[cfg(feature = "mmap")]
pub use io::MappedStream;
pub use loader::{Loaded, Resolver};
pub use memory::{MemoryHandler, SystemMemory, SYSTEM_MEMORY};
pub use saver::Saver;
pub use serial::Serial;
