//! Defines the physical binary layout of respak resource files.
//!
//! This module specifies the on-disk representation: the fixed header, the
//! compressed info region (pack table, pointer table, block-size stream) and
//! the pack payloads. Understanding this format is essential for implementing
//! readers in other languages or debugging file corruption.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────┐  <─┐
//! │ Header (22 bytes)             │    │ Never allocated at load.
//! ├───────────────────────────────┤  <─┤
//! │ Info region (compressed):     │    │ Temporarily allocated; released
//! │   PackEntry[n_packs]          │    │ before the load call returns.
//! │   Ref[n_pointers]             │    │
//! │   u32 block_size[n_blocks]    │    │
//! ├───────────────────────────────┤  <─┤
//! │ Pack payload 0 (blocks)       │    │ The data the user saved, block-
//! │ Pack payload 1 (blocks)       │    │ compressed. Each pack becomes one
//! │ ...                           │    │ allocation through the memory
//! └───────────────────────────────┘  <─┘ handler at load.
//! ```
//!
//! Each pack payload is the concatenation of its compressed blocks, in
//! order; the block-size stream holds every block's stored length, packs
//! back to back. A stored length equal to the pack's block size (or exactly
//! filling the pack) marks a block stored verbatim.
//!
//! ## Endianness
//!
//! All multi-byte fields are little-endian by default. A save with
//! `swap_endian` reverses the header and info-region fields only; pack
//! payload bytes always stay in the writer's native order.
//!
//! ## Versioning
//!
//! * `format_version` is a fixed constant per container revision. A
//!   byte-swapped match means "written for the opposite endianness"
//!   (`WrongVersion`); anything else is `UnknownFileType`.
//! * `resource_version` is the user's version tag for the root type.
//! * `auto_version` is `size_of::<Root>()` truncated to 16 bits, a cheap
//!   layout fingerprint that catches most struct edits.

use std::fmt;
use std::marker::PhantomData;
use std::ops::BitOr;

use crate::endian;
use crate::error::{RespakError, Result};

/// Container format revision written into `Header::format_version`.
pub const FORMAT_VERSION: u16 = 1;

/// Compression block granularity: packs are compressed in blocks of
/// `min(MAX_BLOCK_SIZE, pack length)` bytes.
pub const MAX_BLOCK_SIZE: u32 = 64 * 1024;

/// Alignment of every pointee reservation inside a pack, and of every
/// pointer slot. 8 covers 64-bit hosts; pointer slots are always 8 bytes.
pub const POINTEE_ALIGN: usize = 8;

/// Alignment the loader requests for pack allocations.
pub const PACK_ALLOC_ALIGN: usize = 16;

// ---------------------------------------------------------------------------
// Memory type flags
// ---------------------------------------------------------------------------

/// Memory classification of a pack, stored as one byte.
///
/// Three independent flags:
///
/// * [`MemType::UNIQUE`]: the allocation is separately owned and freeable.
/// * [`MemType::TEMP`]: the allocation is expected to be consumed by the
///   post-load hook and released right after it (mutually exclusive with
///   `UNIQUE`).
/// * [`MemType::VRAM`]: the allocation targets the device-memory path of
///   the memory handler.
///
/// Two values are *compatible for pooling* iff their flag triples are equal;
/// see [`MemType::pool_key`].
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MemType(u8);

impl MemType {
    const UNIQUE_MASK: u8 = 0b0000_0001;
    const TEMP_MASK: u8 = 0b0000_0010;
    const VRAM_MASK: u8 = 0b0000_0100;
    const POOL_MASK: u8 = Self::UNIQUE_MASK | Self::TEMP_MASK | Self::VRAM_MASK;

    /// No flags: pooled main-memory data, freed with the root allocation.
    pub const NONE: Self = Self(0);
    /// Separately freeable allocation.
    pub const UNIQUE: Self = Self(Self::UNIQUE_MASK);
    /// Released after the post-load hook unless claimed.
    pub const TEMP: Self = Self(Self::TEMP_MASK);
    /// Device-memory path.
    pub const VRAM: Self = Self(Self::VRAM_MASK);

    /// Reconstructs flags from their stored byte. Unknown bits are kept
    /// verbatim; they simply never pool with anything this writer emits.
    pub const fn from_u8(byte: u8) -> Self {
        Self(byte)
    }

    /// The stored byte.
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// True if the allocation is separately freeable.
    pub const fn unique(self) -> bool {
        self.0 & Self::UNIQUE_MASK != 0
    }

    /// True if the allocation is post-load-hook scratch.
    pub const fn temp(self) -> bool {
        self.0 & Self::TEMP_MASK != 0
    }

    /// True if the allocation targets device memory.
    pub const fn vram(self) -> bool {
        self.0 & Self::VRAM_MASK != 0
    }

    /// The masked triple used by the pack pooling rule: two memory types
    /// share a pool iff their keys are equal.
    pub const fn pool_key(self) -> u8 {
        self.0 & Self::POOL_MASK
    }

    /// `unique` and `temp` are mutually exclusive; everything else goes.
    pub const fn is_valid(self) -> bool {
        !(self.unique() && self.temp())
    }
}

impl BitOr for MemType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for MemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemType(unique={}, temp={}, vram={})",
            self.unique(),
            self.temp(),
            self.vram()
        )
    }
}

// ---------------------------------------------------------------------------
// Pointer slot
// ---------------------------------------------------------------------------

/// A pointer-shaped slot, aligned and sized to 8 bytes regardless of host
/// pointer width.
///
/// Structures handed to the serializer declare their owning pointers as
/// `DataPtr<T>`. On disk the slot holds meaningless bytes (zeroed for null,
/// reserve filler otherwise); after load it holds a real host pointer,
/// written by the pointer-resolution pass. The high bytes are always
/// defined: the writer zeroes them and the loader writes the pointer value
/// zero-extended to 64 bits, so a wider host never inherits stale bits from
/// a narrower writer.
#[repr(C, align(8))]
pub struct DataPtr<T> {
    value: *mut T,
    _marker: PhantomData<T>,
}

impl<T> DataPtr<T> {
    /// A null slot. Serializing it with count 0 writes eight zero bytes and
    /// emits no pointer-table entry.
    pub const fn null() -> Self {
        Self {
            value: std::ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    /// Wraps a raw pointer.
    pub const fn new(ptr: *mut T) -> Self {
        Self {
            value: ptr,
            _marker: PhantomData,
        }
    }

    /// Points the slot at the first element of a slice. The slot does not
    /// borrow the slice; keeping the pointee alive is the caller's business.
    pub fn from_slice(slice: &mut [T]) -> Self {
        Self::new(slice.as_mut_ptr())
    }

    /// True if the slot holds no pointer.
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// The raw pointer value.
    pub fn as_ptr(&self) -> *mut T {
        self.value
    }

    /// Re-points the slot.
    pub fn set(&mut self, ptr: *mut T) {
        self.value = ptr;
    }

    /// Borrows the pointee.
    ///
    /// # Safety
    ///
    /// The slot must be non-null and point at a live, initialized `T` (for a
    /// loaded object: the [`Loaded`](crate::loader::Loaded) handle must
    /// still be alive).
    pub unsafe fn as_ref(&self) -> &T {
        &*self.value
    }

    /// Borrows `len` contiguous pointees.
    ///
    /// # Safety
    ///
    /// The slot must be non-null and point at `len` live, initialized
    /// elements.
    pub unsafe fn as_slice(&self, len: usize) -> &[T] {
        std::slice::from_raw_parts(self.value, len)
    }
}

impl<T> Default for DataPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Clone for DataPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DataPtr<T> {}

impl<T> fmt::Debug for DataPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataPtr({:p})", self.value)
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// The fixed container header.
///
/// 22 bytes packed: `size_of_data` u32, `format_version` u16, `info_size`
/// u32, `n_pointers` u16, `n_packs` u16, `n_block_sizes` u16,
/// `resource_version` u16, `max_qualities` u16, `auto_version` u16.
///
/// `info_size` (the compressed info-region length) is deliberately 32 bits
/// wide: the table easily exceeds 64 KiB for realistic resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    /// Total bytes after the header (info region + pack payloads). Written
    /// last, by seeking back over the placeholder.
    pub size_of_data: u32,
    /// Container revision; see [`FORMAT_VERSION`].
    pub format_version: u16,
    /// Stored (compressed) length of the info region.
    pub info_size: u32,
    /// Number of pointer-table entries.
    pub n_pointers: u16,
    /// Number of packs. Pack 0 is the root pack.
    pub n_packs: u16,
    /// Total number of per-block size entries across all packs.
    pub n_block_sizes: u16,
    /// User version of the root resource type.
    pub resource_version: u16,
    /// Reserved for resources with multiple quality tiers; always 0.
    pub max_qualities: u16,
    /// `size_of::<Root>()` truncated to 16 bits.
    pub auto_version: u16,
}

impl Header {
    /// The size in bytes of the serialized header.
    pub const SIZE: usize = 22;

    /// Byte offset of `size_of_data` within the header (for the
    /// seek-back patch after the payloads are written).
    pub const SIZE_OF_DATA_OFFSET: u64 = 0;

    /// Serializes to a fixed-size little-endian byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.size_of_data.to_le_bytes());
        buf[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.info_size.to_le_bytes());
        buf[10..12].copy_from_slice(&self.n_pointers.to_le_bytes());
        buf[12..14].copy_from_slice(&self.n_packs.to_le_bytes());
        buf[14..16].copy_from_slice(&self.n_block_sizes.to_le_bytes());
        buf[16..18].copy_from_slice(&self.resource_version.to_le_bytes());
        buf[18..20].copy_from_slice(&self.max_qualities.to_le_bytes());
        buf[20..22].copy_from_slice(&self.auto_version.to_le_bytes());
        buf
    }

    /// Deserializes from a byte buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(RespakError::Corrupt("buffer too small for header".into()));
        }
        Ok(Self {
            size_of_data: read_u32(bytes, 0)?,
            format_version: read_u16(bytes, 4)?,
            info_size: read_u32(bytes, 6)?,
            n_pointers: read_u16(bytes, 10)?,
            n_packs: read_u16(bytes, 12)?,
            n_block_sizes: read_u16(bytes, 14)?,
            resource_version: read_u16(bytes, 16)?,
            max_qualities: read_u16(bytes, 18)?,
            auto_version: read_u16(bytes, 20)?,
        })
    }

    /// A copy with every multi-byte field byte-swapped, for opposite-endian
    /// output.
    pub fn swapped(&self) -> Self {
        Self {
            size_of_data: endian::swap_u32(self.size_of_data),
            format_version: endian::swap_u16(self.format_version),
            info_size: endian::swap_u32(self.info_size),
            n_pointers: endian::swap_u16(self.n_pointers),
            n_packs: endian::swap_u16(self.n_packs),
            n_block_sizes: endian::swap_u16(self.n_block_sizes),
            resource_version: endian::swap_u16(self.resource_version),
            max_qualities: endian::swap_u16(self.max_qualities),
            auto_version: endian::swap_u16(self.auto_version),
        }
    }

    /// Uncompressed length of the info region described by this header.
    pub fn info_region_len(&self) -> usize {
        self.n_packs as usize * PackEntry::SIZE
            + self.n_pointers as usize * Ref::SIZE
            + self.n_block_sizes as usize * 4
    }
}

/// Persisted description of one pack: memory flags, uncompressed length and
/// the number of compressed blocks that make up its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackEntry {
    /// Memory classification; drives allocation and pooling.
    pub flags: MemType,
    /// Length of the pack once decompressed.
    pub uncompressed_size: u32,
    /// Number of blocks in the pack payload.
    pub block_count: u32,
}

impl PackEntry {
    /// The size in bytes of a serialized `PackEntry`.
    pub const SIZE: usize = 9;

    /// Serializes to a fixed-size little-endian byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.flags.as_u8();
        buf[1..5].copy_from_slice(&self.uncompressed_size.to_le_bytes());
        buf[5..9].copy_from_slice(&self.block_count.to_le_bytes());
        buf
    }

    /// Deserializes from a byte buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(RespakError::Corrupt("buffer too small for pack entry".into()));
        }
        Ok(Self {
            flags: MemType::from_u8(bytes[0]),
            uncompressed_size: read_u32(bytes, 1)?,
            block_count: read_u32(bytes, 5)?,
        })
    }

    /// A copy with every multi-byte field byte-swapped.
    pub fn swapped(&self) -> Self {
        Self {
            flags: self.flags,
            uncompressed_size: endian::swap_u32(self.uncompressed_size),
            block_count: endian::swap_u32(self.block_count),
        }
    }
}

/// Persisted pointer-table entry: tells the loader to write the address of
/// `packs[pointing_at_pack] + pointing_at` into the 8-byte slot at
/// `packs[offset_pack] + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ref {
    /// Byte offset of the pointee inside its pack.
    pub pointing_at: u32,
    /// Byte offset of the pointer slot inside its pack. Always 8-aligned.
    pub offset: u32,
    /// Number of elements at the target (1 for scalar pointees).
    pub count: u32,
    /// Pack holding the pointer slot.
    pub offset_pack: u16,
    /// Pack holding the pointee.
    pub pointing_at_pack: u16,
}

impl Ref {
    /// The size in bytes of a serialized `Ref`.
    pub const SIZE: usize = 16;

    /// Serializes to a fixed-size little-endian byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.pointing_at.to_le_bytes());
        buf[4..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.count.to_le_bytes());
        buf[12..14].copy_from_slice(&self.offset_pack.to_le_bytes());
        buf[14..16].copy_from_slice(&self.pointing_at_pack.to_le_bytes());
        buf
    }

    /// Deserializes from a byte buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(RespakError::Corrupt("buffer too small for ref".into()));
        }
        Ok(Self {
            pointing_at: read_u32(bytes, 0)?,
            offset: read_u32(bytes, 4)?,
            count: read_u32(bytes, 8)?,
            offset_pack: read_u16(bytes, 12)?,
            pointing_at_pack: read_u16(bytes, 14)?,
        })
    }

    /// A copy with every multi-byte field byte-swapped.
    pub fn swapped(&self) -> Self {
        Self {
            pointing_at: endian::swap_u32(self.pointing_at),
            offset: endian::swap_u32(self.offset),
            count: endian::swap_u32(self.count),
            offset_pack: endian::swap_u16(self.offset_pack),
            pointing_at_pack: endian::swap_u16(self.pointing_at_pack),
        }
    }
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16> {
    bytes
        .get(at..at + 2)
        .and_then(|s| s.try_into().ok())
        .map(u16::from_le_bytes)
        .ok_or_else(|| RespakError::Corrupt("failed to read u16 field".into()))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| RespakError::Corrupt("failed to read u32 field".into()))
}

