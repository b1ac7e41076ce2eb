//! Save-side transient state: per-pack byte buffers and the writing
//! context.
//!
//! During a save every pack is backed by a [`PackBuffer`], an in-memory
//! file: the walker seeks around in it to land field bytes at their
//! layout offsets, and the pointer op appends aligned pointee
//! reservations at its end. The buffer implements [`ByteStream`], so the
//! engine drives it through the same contract as the output stream.
//!
//! [`WriteContext`] owns the growing pack list plus the two ordered logs
//! that become the info region: the pointer table and the per-block
//! compressed-size stream.

use crate::error::{RespakError, Result};
use crate::format::{MemType, Ref};
use crate::io::ByteStream;

/// A growable, seekable byte buffer backing one pack during save.
///
/// Writes past the end extend the buffer; seeking past the end and then
/// writing zero-fills the gap, which keeps untouched padding
/// deterministic.
#[derive(Debug)]
pub struct PackBuffer {
    flags: MemType,
    bytes: Vec<u8>,
    cursor: usize,
}

impl PackBuffer {
    /// Creates an empty pack with the given memory flags.
    pub fn new(flags: MemType) -> Self {
        Self {
            flags,
            bytes: Vec::new(),
            cursor: 0,
        }
    }

    /// Memory classification of this pack.
    pub fn flags(&self) -> MemType {
        self.flags
    }

    /// Bytes written so far (the pack's uncompressed size).
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The accumulated pack content.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteStream for PackBuffer {
    fn read_span(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.cursor + buf.len();
        let src = self.bytes.get(self.cursor..end).ok_or_else(|| {
            RespakError::from(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "pack buffer read past end",
            ))
        })?;
        buf.copy_from_slice(src);
        self.cursor = end;
        Ok(())
    }

    fn write_span(&mut self, buf: &[u8]) -> Result<()> {
        let end = self.cursor + buf.len();
        if self.cursor > self.bytes.len() {
            self.bytes.resize(self.cursor, 0);
        }
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[self.cursor..end].copy_from_slice(buf);
        self.cursor = end;
        Ok(())
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.cursor as u64)
    }

    fn seek_origin(&mut self, pos: u64) -> Result<()> {
        self.cursor = pos as usize;
        Ok(())
    }

    fn seek_end(&mut self, offset: i64) -> Result<u64> {
        let end = self.bytes.len() as i64 + offset;
        self.cursor = end.max(0) as usize;
        Ok(self.cursor as u64)
    }

    fn stream_len(&mut self) -> Result<u64> {
        Ok(self.bytes.len() as u64)
    }
}

/// Everything the save walk accumulates before the container is written:
/// packs, pointer table, block-size stream, and the endian-swap flag.
#[derive(Debug)]
pub struct WriteContext {
    /// All packs, index order = on-disk order. Pack 0 is the root pack.
    pub packs: Vec<PackBuffer>,
    /// Pointer table, in walk order.
    pub refs: Vec<Ref>,
    /// Per-block stored sizes, in pack-then-block order.
    pub block_sizes: Vec<u32>,
    /// Write header/info-region fields for the opposite endianness.
    pub swap_endian: bool,
}

impl WriteContext {
    /// Creates an empty context.
    pub fn new(swap_endian: bool) -> Self {
        Self {
            packs: Vec::new(),
            refs: Vec::new(),
            block_sizes: Vec::new(),
            swap_endian,
        }
    }

    /// Appends a fresh pack and returns its index.
    pub fn allocate_pack(&mut self, flags: MemType) -> Result<u16> {
        let index = u16::try_from(self.packs.len())
            .map_err(|_| RespakError::Corrupt("more than 65535 packs".into()))?;
        self.packs.push(PackBuffer::new(flags));
        Ok(index)
    }

    /// Scans for a pack whose flags are pool-compatible with `flags`.
    /// Unique allocations never pool; the caller handles that case before
    /// asking.
    pub fn find_pool(&self, flags: MemType) -> Option<u16> {
        debug_assert!(!flags.unique());
        self.packs
            .iter()
            .position(|pack| pack.flags().pool_key() == flags.pool_key())
            .map(|i| i as u16)
    }
}

