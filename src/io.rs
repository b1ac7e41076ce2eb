//! Seekable byte-stream abstraction consumed by the save and load engines.
//!
//! The engines never touch `std::io` directly; everything goes through
//! [`ByteStream`], which is the full surface the container code needs:
//! span reads and writes, absolute seeks, stream length, fill/align
//! helpers, and a `synchronize` barrier.
//!
//! `synchronize` exists for implementations that pipeline reads: the load
//! engine issues the next compressed block's read, decompresses the
//! previous one, then synchronizes before touching the new buffer. The
//! bundled implementations are synchronous, so their barrier is a no-op,
//! but the engine is written against the pipelined contract.
//!
//! Implementations here:
//!
//! * [`IoStream`]: adapter over anything `Read + Write + Seek`
//!   (files, cursors).
//! * [`MappedStream`]: read-only, memory-mapped file source
//!   (feature `mmap`).
//!
//! The save-side pack buffers implement the same trait; see
//! [`PackBuffer`](crate::pack::PackBuffer).

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Result;

/// Chunk used by the fill helper; fills are rare and small (alignment pads,
/// reservations), so a stack buffer is plenty.
const FILL_CHUNK: usize = 256;

/// A seekable byte stream.
///
/// Offsets are absolute from the stream origin. All operations either
/// complete fully or fail; there are no partial reads or writes.
pub trait ByteStream {
    /// Reads exactly `buf.len()` bytes at the cursor.
    ///
    /// A pipelined implementation may return before the bytes have landed;
    /// the buffer must not be touched until [`synchronize`](Self::synchronize)
    /// returns.
    fn read_span(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Writes all of `buf` at the cursor.
    fn write_span(&mut self, buf: &[u8]) -> Result<()>;

    /// Current cursor position.
    fn tell(&mut self) -> Result<u64>;

    /// Seeks to an absolute position.
    fn seek_origin(&mut self, pos: u64) -> Result<()>;

    /// Seeks relative to the end; returns the new position.
    fn seek_end(&mut self, offset: i64) -> Result<u64>;

    /// Total length of the stream.
    fn stream_len(&mut self) -> Result<u64>;

    /// Barrier for any outstanding pipelined read. No-op for synchronous
    /// implementations.
    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Writes `count` copies of `fill` at the cursor.
    fn put_fill(&mut self, fill: u8, count: usize) -> Result<()> {
        let chunk = [fill; FILL_CHUNK];
        let mut remaining = count;
        while remaining > 0 {
            let n = remaining.min(FILL_CHUNK);
            self.write_span(&chunk[..n])?;
            remaining -= n;
        }
        Ok(())
    }

    /// Pads the cursor up to `alignment` with `fill`, pre-extends the
    /// stream by `reserve` more fill bytes, and leaves the cursor at the
    /// start of the reservation. Returns that start position.
    ///
    /// The save engine uses this to carve out a pointee region: later
    /// writes seek back into the reserved range, and untouched bytes keep
    /// the filler value.
    fn align_reserve(&mut self, fill: u8, reserve: usize, alignment: u64) -> Result<u64> {
        debug_assert!(alignment.is_power_of_two());
        let pos = self.tell()?;
        let aligned = (pos + alignment - 1) & !(alignment - 1);
        self.put_fill(fill, (aligned - pos) as usize)?;
        self.put_fill(fill, reserve)?;
        self.seek_origin(aligned)?;
        Ok(aligned)
    }
}

// ---------------------------------------------------------------------------
// std adapter
// ---------------------------------------------------------------------------

/// Adapter implementing [`ByteStream`] over any `Read + Write + Seek`
/// value: `std::fs::File`, `std::io::Cursor<Vec<u8>>`, ...
#[derive(Debug)]
pub struct IoStream<S> {
    inner: S,
}

impl<S> IoStream<S> {
    /// Wraps a stream.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Borrows the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: Read + Write + Seek> ByteStream for IoStream<S> {
    fn read_span(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf)?;
        Ok(())
    }

    fn write_span(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf)?;
        Ok(())
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    fn seek_origin(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn seek_end(&mut self, offset: i64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::End(offset))?)
    }

    fn stream_len(&mut self) -> Result<u64> {
        let pos = self.inner.stream_position()?;
        let len = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(len)
    }
}

// ---------------------------------------------------------------------------
// Memory-mapped source
// ---------------------------------------------------------------------------

/// Read-only [`ByteStream`] over a memory-mapped file.
///
/// The natural load source for big resource blobs: no buffered-read
/// copies, pages fault in as the loader walks the packs. Writing through
/// it is an error.
#[cfg(feature = "mmap")]
#[derive(Debug)]
pub struct MappedStream {
    map: memmap2::Mmap,
    pos: usize,
}

#[cfg(feature = "mmap")]
impl MappedStream {
    /// Maps a file for reading.
    ///
    /// The map assumes the file is not modified while mapped; resource
    /// files are immutable once written, which is the intended use.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        // SAFETY: respak resource files are write-once; the map is never
        // aliased by a writer in this process.
        #[allow(unsafe_code)]
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self { map, pos: 0 })
    }

    fn unsupported() -> crate::error::RespakError {
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "MappedStream is read-only",
        )
        .into()
    }
}

#[cfg(feature = "mmap")]
impl ByteStream for MappedStream {
    fn read_span(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.pos.checked_add(buf.len()).ok_or_else(|| {
            crate::error::RespakError::Corrupt("mapped read past address space".into())
        })?;
        let src = self.map.get(self.pos..end).ok_or_else(|| {
            crate::error::RespakError::from(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "mapped read past end of file",
            ))
        })?;
        buf.copy_from_slice(src);
        self.pos = end;
        Ok(())
    }

    fn write_span(&mut self, _buf: &[u8]) -> Result<()> {
        Err(Self::unsupported())
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos as u64)
    }

    fn seek_origin(&mut self, pos: u64) -> Result<()> {
        self.pos = pos as usize;
        Ok(())
    }

    fn seek_end(&mut self, offset: i64) -> Result<u64> {
        let end = self.map.len() as i64 + offset;
        self.pos = end.max(0) as usize;
        Ok(self.pos as u64)
    }

    fn stream_len(&mut self) -> Result<u64> {
        Ok(self.map.len() as u64)
    }
}

