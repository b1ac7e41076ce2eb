//! The load engine: header triage, pack decompression, pointer fix-up.
//!
//! Loading is three stages, each cheap by construction:
//!
//! 1. **Header** ([`load_header`]): 22 bytes, version triage. An exact
//!    `format_version` match proceeds; a byte-swapped match means the file
//!    was written for the opposite endianness (`WrongVersion`); anything
//!    else is `UnknownFileType`. `auto_version` (the writer's root size)
//!    and `resource_version` must match the loading type.
//! 2. **Packs**: the info region is read and decompressed, then every pack
//!    gets one allocation from the memory handler and its blocks are
//!    decompressed straight into it. Reads are double-buffered: while one
//!    compressed block decompresses, the next one's read is already in
//!    flight; `ByteStream::synchronize` is the barrier. Blocks whose
//!    stored size equals the pack's block size (or exactly fills the pack)
//!    were stored verbatim and are copied instead of decompressed.
//! 3. **Pointers**: each [`Ref`] writes the host address of
//!    `packs[pointing_at_pack] + pointing_at` into the 8-byte slot at
//!    `packs[offset_pack] + offset`. One linear pass; order is irrelevant.
//!
//! Every ref is bounds-checked against its packs before anything is
//! written: the writer is trusted, the file is not.
//!
//! The result is a [`Loaded<T>`] handle owning all pack allocations. After
//! pointer resolution the root type's [`resolve`](crate::Serial::resolve)
//! hook runs; a pack flagged `temp` is released right after it unless the
//! hook claims it through [`Resolver::dont_free_temp_data`].

use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::codec::Decompressor;
use crate::endian;
use crate::error::{RespakError, Result};
use crate::format::{
    Header, MemType, PackEntry, Ref, FORMAT_VERSION, MAX_BLOCK_SIZE, PACK_ALLOC_ALIGN,
};
use crate::io::ByteStream;
use crate::memory::MemoryHandler;
use crate::serial::Serial;

// ---------------------------------------------------------------------------
// Header triage
// ---------------------------------------------------------------------------

/// Reads and validates the container header against the expected root size.
pub(crate) fn load_header<S: ByteStream>(stream: &mut S, size_of_root: usize) -> Result<Header> {
    let mut bytes = [0u8; Header::SIZE];
    stream.read_span(&mut bytes)?;
    stream.synchronize()?;
    let header = Header::from_bytes(&bytes)?;

    if header.format_version != FORMAT_VERSION {
        if endian::swap_u16(header.format_version) == FORMAT_VERSION {
            log::error!("resource file was written for the opposite endianness");
            return Err(RespakError::WrongVersion(
                "file was written for the opposite endianness",
            ));
        }
        return Err(RespakError::UnknownFileType);
    }

    if header.auto_version != size_of_root as u16 {
        log::error!(
            "root structure size mismatch: file says {}, loader has {}",
            header.auto_version,
            size_of_root as u16
        );
        return Err(RespakError::WrongVersion(
            "the root structure used for writing differs in size from the one reading",
        ));
    }

    Ok(header)
}

// ---------------------------------------------------------------------------
// Pack allocations
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LoadedPack {
    ptr: NonNull<u8>,
    size: usize,
    flags: MemType,
    released: bool,
}

/// All pack allocations of one load, released through the handler when
/// dropped. Exists separately from [`Loaded`] so a failure halfway through
/// decompression still frees what was already allocated.
struct PackSet<'h> {
    packs: Vec<LoadedPack>,
    handler: &'h dyn MemoryHandler,
}

impl<'h> PackSet<'h> {
    fn new(handler: &'h dyn MemoryHandler) -> Self {
        Self {
            packs: Vec::new(),
            handler,
        }
    }

    fn allocate(&mut self, entry: &PackEntry) -> NonNull<u8> {
        let ptr = self
            .handler
            .allocate(entry.flags, entry.uncompressed_size as usize, PACK_ALLOC_ALIGN);
        self.packs.push(LoadedPack {
            ptr,
            size: entry.uncompressed_size as usize,
            flags: entry.flags,
            released: false,
        });
        ptr
    }

    fn get(&self, index: u16) -> Result<&LoadedPack> {
        self.packs
            .get(index as usize)
            .filter(|pack| !pack.released)
            .ok_or_else(|| RespakError::Corrupt(format!("ref names missing pack {index}")))
    }

    fn release(&mut self, index: usize) {
        if let Some(pack) = self.packs.get_mut(index) {
            if !pack.released {
                // SAFETY: ptr came from this handler with this layout and
                // is released exactly once.
                #[allow(unsafe_code)]
                unsafe {
                    self.handler
                        .release(pack.flags, pack.ptr, pack.size, PACK_ALLOC_ALIGN);
                }
                pack.released = true;
            }
        }
    }
}

impl Drop for PackSet<'_> {
    fn drop(&mut self) {
        for i in 0..self.packs.len() {
            self.release(i);
        }
    }
}

// ---------------------------------------------------------------------------
// Load proper
// ---------------------------------------------------------------------------

/// Runs a full load from the stream's current position.
///
/// # Safety
///
/// The stream must hold a container saved for the same `T` (same layout, a
/// matching pointer width). The version triage catches size and version
/// drift, not a same-size relayout.
pub(crate) unsafe fn load_root<'h, T: Serial, S: ByteStream>(
    stream: &mut S,
    handler: &'h dyn MemoryHandler,
) -> Result<Loaded<'h, T>> {
    let header = load_header(stream, mem::size_of::<T>())?;
    if header.resource_version != T::VERSION {
        return Err(RespakError::WrongVersion("wrong resource version"));
    }

    let info = read_info_region(stream, &header)?;
    let (entries, refs, block_sizes) = parse_info_region(&info, &header)?;

    if entries.is_empty() {
        return Err(RespakError::Corrupt("container has no packs".into()));
    }
    if (entries[0].uncompressed_size as usize) < mem::size_of::<T>() {
        return Err(RespakError::Corrupt("root pack smaller than the root value".into()));
    }
    if entries.iter().any(|e| e.uncompressed_size == 0) {
        return Err(RespakError::Corrupt("empty pack in pack table".into()));
    }
    let total_blocks: u64 = entries.iter().map(|e| u64::from(e.block_count)).sum();
    if total_blocks != block_sizes.len() as u64 {
        return Err(RespakError::Corrupt("block count does not match block-size table".into()));
    }

    let (packs, temp_index) = decompress_packs(stream, &entries, &block_sizes, handler)?;
    resolve_pointers(&packs, &refs)?;

    log::debug!(
        "loaded {} packs, {} refs resolved, resource version {}",
        entries.len(),
        refs.len(),
        header.resource_version
    );

    let root = packs.packs[0].ptr.cast::<T>();
    let mut loaded = Loaded {
        root,
        packs,
        temp_index,
        resource_version: header.resource_version,
        _marker: PhantomData,
    };

    // Post-load hook, then temp release unless the hook claimed the data.
    let mut free_temp = true;
    {
        let temp = loaded.temp_ptr();
        let mut resolver = Resolver {
            resource_version: header.resource_version,
            temp,
            free_temp: &mut free_temp,
        };
        // SAFETY: pack 0 holds an initialized T (caller contract) and all
        // pointers have been resolved.
        loaded.root.as_mut().resolve(&mut resolver);
    }
    if free_temp {
        // A temp root pack stays alive regardless: releasing it would
        // dangle the handle itself.
        if let Some(index) = loaded.temp_index.filter(|&i| i != 0) {
            loaded.packs.release(index);
        }
    }

    Ok(loaded)
}

fn read_info_region<S: ByteStream>(stream: &mut S, header: &Header) -> Result<Vec<u8>> {
    let info_len = header.info_region_len();
    let stored = header.info_size as usize;
    if stored > info_len {
        return Err(RespakError::Corrupt("info region larger than its tables".into()));
    }

    let mut info = vec![0u8; info_len];
    if stored < info_len {
        let mut compressed = vec![0u8; stored];
        stream.read_span(&mut compressed)?;
        stream.synchronize()?;
        let mut decompressor = Decompressor::new(info_len as u32);
        let written = decompressor.unpack(&mut info, &compressed)?;
        if written != info_len {
            return Err(RespakError::Corrupt(
                "info region decompressed to the wrong length".into(),
            ));
        }
    } else {
        // Equal size: uncompressed passthrough, read straight into place.
        stream.read_span(&mut info)?;
        stream.synchronize()?;
    }
    Ok(info)
}

fn parse_info_region(
    info: &[u8],
    header: &Header,
) -> Result<(Vec<PackEntry>, Vec<Ref>, Vec<u32>)> {
    let mut offset = 0usize;

    let mut entries = Vec::with_capacity(header.n_packs as usize);
    for _ in 0..header.n_packs {
        let bytes = info
            .get(offset..)
            .ok_or_else(|| RespakError::Corrupt("info region truncated".into()))?;
        entries.push(PackEntry::from_bytes(bytes)?);
        offset += PackEntry::SIZE;
    }

    let mut refs = Vec::with_capacity(header.n_pointers as usize);
    for _ in 0..header.n_pointers {
        let bytes = info
            .get(offset..)
            .ok_or_else(|| RespakError::Corrupt("info region truncated".into()))?;
        refs.push(Ref::from_bytes(bytes)?);
        offset += Ref::SIZE;
    }

    let mut block_sizes = Vec::with_capacity(header.n_block_sizes as usize);
    for _ in 0..header.n_block_sizes {
        let bytes = info
            .get(offset..offset + 4)
            .ok_or_else(|| RespakError::Corrupt("info region truncated".into()))?;
        block_sizes.push(u32::from_le_bytes(bytes.try_into().map_err(|_| {
            RespakError::Corrupt("info region truncated".into())
        })?));
        offset += 4;
    }

    Ok((entries, refs, block_sizes))
}

fn block_len(block_sizes: &[u32], index: usize) -> Result<usize> {
    let len = *block_sizes
        .get(index)
        .ok_or_else(|| RespakError::Corrupt("block-size table truncated".into()))?;
    if len == 0 || len > MAX_BLOCK_SIZE {
        return Err(RespakError::Corrupt(format!("implausible block size {len}")));
    }
    Ok(len as usize)
}

/// Decompresses every pack with double-buffered read-ahead.
///
/// Two block-sized scratch buffers alternate: the next compressed block's
/// read is issued, then the previous block is decompressed while the read
/// is (conceptually) in flight, then `synchronize` closes the gap.
fn decompress_packs<'h, S: ByteStream>(
    stream: &mut S,
    entries: &[PackEntry],
    block_sizes: &[u32],
    handler: &'h dyn MemoryHandler,
) -> Result<(PackSet<'h>, Option<usize>)> {
    let mut buffers = [
        vec![0u8; MAX_BLOCK_SIZE as usize],
        vec![0u8; MAX_BLOCK_SIZE as usize],
    ];
    let mut current = 0usize;
    let mut block = 0usize;

    let mut packs = PackSet::new(handler);
    let mut temp_index: Option<usize> = None;

    // The very first block has no previous block to interleave with.
    if entries.first().map_or(0, |e| e.block_count) > 0 {
        let len = block_len(block_sizes, 0)?;
        stream.read_span(&mut buffers[current][..len])?;
    }

    for (ipack, entry) in entries.iter().enumerate() {
        let uncompressed = entry.uncompressed_size as usize;
        let block_size = MAX_BLOCK_SIZE.min(entry.uncompressed_size);
        let mut decompressor = Decompressor::new(block_size);

        let ptr = packs.allocate(entry);
        if entry.flags.temp() {
            debug_assert!(temp_index.is_none(), "at most one temp pack per resource");
            temp_index = Some(ipack);
        }
        // SAFETY: freshly allocated, `uncompressed` bytes, exclusively ours.
        #[allow(unsafe_code)]
        let dst = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), uncompressed) };

        let mut written = 0usize;

        // Middle blocks: kick off the next read, then handle the previous.
        for _ in 1..entry.block_count {
            let prev_len = block_len(block_sizes, block)?;
            current ^= 1;
            stream.synchronize()?;
            let next_len = block_len(block_sizes, block + 1)?;
            stream.read_span(&mut buffers[current][..next_len])?;

            let src = &buffers[current ^ 1][..prev_len];
            if prev_len as u32 == block_size {
                if written + prev_len > uncompressed {
                    return Err(RespakError::Corrupt("pack blocks overflow the pack".into()));
                }
                dst[written..written + prev_len].copy_from_slice(src);
                written += prev_len;
            } else {
                written += decompressor.unpack(&mut dst[written..], src)?;
            }
            block += 1;
        }

        stream.synchronize()?;

        // Interleave the next pack's first block with this pack's last.
        if ipack + 1 < entries.len() && entries[ipack + 1].block_count > 0 {
            let next_len = block_len(block_sizes, block + 1)?;
            stream.read_span(&mut buffers[current ^ 1][..next_len])?;
        }

        // Last block of this pack.
        if entry.block_count > 0 {
            let len = block_len(block_sizes, block)?;
            let src = &buffers[current][..len];
            let verbatim = len as u32 == block_size || written + len == uncompressed;
            if verbatim {
                if written + len > uncompressed {
                    return Err(RespakError::Corrupt("pack blocks overflow the pack".into()));
                }
                dst[written..written + len].copy_from_slice(src);
                written += len;
            } else {
                written += decompressor.unpack(&mut dst[written..], src)?;
            }
            block += 1;
            current ^= 1;
        }

        if written != uncompressed {
            return Err(RespakError::Corrupt(format!(
                "pack {ipack} decompressed to {written} bytes, expected {uncompressed}"
            )));
        }
    }

    Ok((packs, temp_index))
}

/// Rewrites every pointer slot with the host address of its pointee.
fn resolve_pointers(packs: &PackSet<'_>, refs: &[Ref]) -> Result<()> {
    for r in refs {
        let src = packs.get(r.pointing_at_pack)?;
        let dst = packs.get(r.offset_pack)?;

        let offset = r.offset as usize;
        if offset % 8 != 0 || offset + 8 > dst.size {
            return Err(RespakError::Corrupt(format!(
                "ref slot at {offset} outside pack {}",
                r.offset_pack
            )));
        }
        let pointing_at = r.pointing_at as usize;
        if pointing_at > src.size {
            return Err(RespakError::Corrupt(format!(
                "ref target at {pointing_at} outside pack {}",
                r.pointing_at_pack
            )));
        }

        let target = src.ptr.as_ptr() as usize + pointing_at;
        // SAFETY: slot lies inside the dst pack (checked above) and is
        // 8-aligned (offset is 8-aligned, allocations are 16-aligned).
        // Writing the full 8 bytes zero-extends on 32-bit hosts.
        #[allow(unsafe_code)]
        unsafe {
            let slot = dst.ptr.as_ptr().add(offset) as *mut u64;
            slot.write(target as u64);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// The owning handle
// ---------------------------------------------------------------------------

/// A loaded resource: the root value plus ownership of every pack backing
/// it.
///
/// Dereferences to the root. All packs (pooled, unique and unclaimed
/// temp) are released through the memory handler when the handle drops;
/// nothing outlives it. Pointers inside the resource (`DataPtr` fields)
/// are valid exactly as long as the handle is alive.
pub struct Loaded<'h, T> {
    root: NonNull<T>,
    packs: PackSet<'h>,
    temp_index: Option<usize>,
    resource_version: u16,
    _marker: PhantomData<T>,
}

impl<T> Loaded<'_, T> {
    /// The resource version recorded in the container.
    pub fn resource_version(&self) -> u16 {
        self.resource_version
    }

    /// The temp pack's data, if the resource has one and it is still
    /// alive (the hook claimed it with
    /// [`Resolver::dont_free_temp_data`]).
    pub fn temp_data(&self) -> Option<NonNull<u8>> {
        self.temp_ptr()
    }

    fn temp_ptr(&self) -> Option<NonNull<u8>> {
        let index = self.temp_index?;
        let pack = self.packs.packs.get(index)?;
        (!pack.released).then_some(pack.ptr)
    }
}

impl<T> Deref for Loaded<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: pack 0 holds an initialized T for the handle's lifetime.
        #[allow(unsafe_code)]
        unsafe {
            self.root.as_ref()
        }
    }
}

impl<T> DerefMut for Loaded<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in Deref; the handle has exclusive ownership.
        #[allow(unsafe_code)]
        unsafe {
            self.root.as_mut()
        }
    }
}

impl<T> std::fmt::Debug for Loaded<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loaded")
            .field("packs", &self.packs.packs.len())
            .field("resource_version", &self.resource_version)
            .finish()
    }
}

/// Post-load context handed to [`Serial::resolve`].
///
/// The hook runs on the main thread after every pointer is resolved:
/// the place to register data with other systems, and to decide the fate
/// of the temp pack.
pub struct Resolver<'a> {
    resource_version: u16,
    temp: Option<NonNull<u8>>,
    free_temp: &'a mut bool,
}

impl Resolver<'_> {
    /// The resource version recorded in the container.
    pub fn resource_version(&self) -> u16 {
        self.resource_version
    }

    /// The temp pack's data, if the resource has one.
    pub fn temp_data(&self) -> Option<NonNull<u8>> {
        self.temp
    }

    /// Claims the temp pack: the loader will not release it after the
    /// hook; it stays alive until the [`Loaded`] handle drops.
    pub fn dont_free_temp_data(&mut self) {
        *self.free_temp = false;
    }
}
