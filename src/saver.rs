//! The save engine: recursive graph walk, pack selection, container
//! assembly.
//!
//! ## The frame
//!
//! The walker carries one implicit *frame* describing the value whose
//! descriptor is currently running: the pack it serializes into, its start
//! offset inside that pack, and its in-memory address range. A field is
//! **local** iff its address falls inside the frame's range; locals write
//! their bytes at `frame_offset + (field_addr - frame_base)`, the exact
//! layout offset, without any new bookkeeping. Values reached through
//! pointers are not local, so the walker pushes a fresh frame for each,
//! anchored at the pack cursor where their bytes were reserved.
//!
//! ## The pointer op
//!
//! Crossing a pointer does four things: picks a target pack (fresh for
//! `unique`, pooled by memory-type otherwise), reserves an 8-aligned region
//! for the pointee at that pack's end, appends a [`Ref`] telling the loader
//! which slot to patch, and walks the pointee into the reservation. Plain
//! element types short-circuit to one contiguous byte copy.
//!
//! ## Container assembly
//!
//! After the walk, [`Saver::save_file`] compresses each pack block by
//! block (incompressible blocks are stored verbatim at their uncompressed
//! length), lays out and compresses the info region, and writes
//! `header ‖ info ‖ payloads`, patching `size_of_data` at the end. Output
//! is byte-identical for identical input: every table is appended in walk
//! order.

use std::marker::PhantomData;
use std::mem;

use crate::codec::{CompressionLevel, Compressor, PackState};
use crate::endian;
use crate::error::{RespakError, Result};
use crate::format::{
    DataPtr, Header, MemType, PackEntry, Ref, FORMAT_VERSION, MAX_BLOCK_SIZE, POINTEE_ALIGN,
};
use crate::io::ByteStream;
use crate::pack::WriteContext;
use crate::serial::Serial;

/// The save-time stream handle descriptors receive.
///
/// Descriptors interact with the engine exclusively through
/// [`serialize`](Saver::serialize), [`serialize_ptr`](Saver::serialize_ptr)
/// and the small query/setter surface below. The lifetime ties the saver to
/// the borrow of the value being saved.
pub struct Saver<'a> {
    ctx: WriteContext,
    level: CompressionLevel,
    resource_version: u16,
    root_size: u32,

    // Current frame.
    pack: u16,
    class_pos: u32,
    class_ptr: *const u8,
    class_size: u32,

    _root: PhantomData<&'a ()>,
}

/// Runs a full save: binds the root frame, walks the root descriptor, then
/// assembles the container onto `stream` at its current position.
pub(crate) fn save_root<T: Serial, S: ByteStream>(
    stream: &mut S,
    root: &T,
    level: CompressionLevel,
    root_flags: MemType,
    swap_endian: bool,
) -> Result<()> {
    debug_assert!(root_flags.is_valid(), "unique and temp are exclusive");
    let root_size = u32::try_from(mem::size_of::<T>())
        .map_err(|_| RespakError::Corrupt("root structure exceeds 4 GiB".into()))?;

    let mut saver = Saver {
        ctx: WriteContext::new(swap_endian),
        level,
        resource_version: T::VERSION,
        root_size,
        pack: 0,
        class_pos: 0,
        class_ptr: root as *const T as *const u8,
        class_size: root_size,
        _root: PhantomData,
    };

    let root_pack = saver.ctx.allocate_pack(root_flags)?;
    debug_assert_eq!(root_pack, 0, "pack 0 is the root pack");

    // Byte 0 of pack 0 is the root value: reserve its image up front so
    // the descriptor can land fields anywhere inside it.
    saver.current_pack().put_fill(0, root_size as usize)?;

    root.describe(&mut saver)?;
    saver.save_file(stream)
}

impl<'a> Saver<'a> {
    // -----------------------------------------------------------------
    // Descriptor-visible surface
    // -----------------------------------------------------------------

    /// Scalar op: persists one value.
    ///
    /// Plain types are copied as raw bytes at their layout offset.
    /// Descriptor types run their descriptor: in place if the value is
    /// local to the current frame, in a pushed frame (at the current pack
    /// cursor) otherwise.
    pub fn serialize<T: Serial>(&mut self, value: &T) -> Result<()> {
        if T::PLAIN {
            return self.write_plain(value);
        }

        let addr = value as *const T as *const u8;
        if self.is_local(addr) {
            return value.describe(self);
        }

        // Outside the frame: give the value its own frame at the cursor,
        // then step past its full image whether or not the descriptor
        // touched every byte.
        let size = u32::try_from(mem::size_of::<T>())
            .map_err(|_| RespakError::Corrupt("value exceeds 4 GiB".into()))?;
        let pos = u32::try_from(self.current_pack().tell()?)
            .map_err(|_| RespakError::Corrupt("pack exceeds 4 GiB".into()))?;

        let saved = (self.class_pos, self.class_ptr, self.class_size);
        self.class_pos = pos;
        self.class_ptr = addr;
        self.class_size = size;
        let walked = value.describe(self);
        (self.class_pos, self.class_ptr, self.class_size) = saved;
        walked?;

        self.current_pack().seek_origin(u64::from(pos) + u64::from(size))
    }

    /// Pointer op: persists a pointee and records the fix-up.
    ///
    /// A null slot (count 0) writes eight zero bytes and emits no ref.
    /// Otherwise the pointee region is reserved in the chosen pack, a
    /// [`Ref`] is appended, and the `count` elements are walked into the
    /// reservation.
    ///
    /// `flags` classifies the pointee's allocation: `UNIQUE` always gets a
    /// fresh pack; anything else pools with the first pack carrying the
    /// same memory type.
    ///
    /// # Safety
    ///
    /// A non-null `slot` must point at `count` initialized elements that
    /// stay live for the duration of the call.
    pub unsafe fn serialize_ptr<T: Serial>(
        &mut self,
        slot: &DataPtr<T>,
        count: usize,
        flags: MemType,
    ) -> Result<()> {
        let slot_addr = slot as *const DataPtr<T> as *const u8;

        if slot.is_null() || count == 0 {
            debug_assert!(
                !slot.is_null() || count == 0,
                "null pointer serialized with a non-zero count"
            );
            // Write the full 8 bytes so a wider host never reads stale
            // high bits out of the slot.
            let pos = u64::from(self.class_pos) + u64::from(self.local_offset(slot_addr));
            let pack = self.current_pack();
            pack.seek_origin(pos)?;
            return pack.write_span(&[0u8; 8]);
        }

        debug_assert!(mem::size_of::<T>() > 0, "zero-sized pointees are not representable");
        debug_assert!(flags.is_valid(), "unique and temp are exclusive");

        let parent = self.pack;
        let parent_flags = self.ctx.packs[parent as usize].flags();
        // A pooled child under a separately-freed parent would dangle the
        // moment the parent is released; same for temp.
        if parent_flags.unique() {
            debug_assert!(flags.unique(), "children of a unique pack must be unique");
        } else if parent_flags.temp() {
            debug_assert!(flags.temp(), "children of a temp pack must be temp");
        }

        let target = if flags.unique() {
            self.ctx.allocate_pack(flags)?
        } else {
            match self.ctx.find_pool(flags) {
                Some(index) => index,
                None => self.ctx.allocate_pack(flags)?,
            }
        };

        let total = mem::size_of::<T>()
            .checked_mul(count)
            .ok_or_else(|| RespakError::Corrupt("pointee run overflows".into()))?;

        let target_pack = &mut self.ctx.packs[target as usize];
        target_pack.seek_end(0)?;
        let pointee_pos = target_pack.align_reserve(0, total, POINTEE_ALIGN as u64)?;

        let offset = self.class_pos + self.local_offset(slot_addr);
        debug_assert_eq!(offset % 8, 0, "pointer slots must sit at 8-aligned offsets");
        self.ctx.refs.push(Ref {
            pointing_at: u32::try_from(pointee_pos)
                .map_err(|_| RespakError::Corrupt("pack exceeds 4 GiB".into()))?,
            offset,
            count: u32::try_from(count)
                .map_err(|_| RespakError::Corrupt("pointee count exceeds u32".into()))?,
            offset_pack: parent,
            pointing_at_pack: target,
        });

        // Walk the pointee inside the target pack.
        self.pack = target;
        let base = slot.as_ptr() as *const u8;
        if T::PLAIN {
            // SAFETY: caller guarantees `count` live elements at `base`.
            let bytes = std::slice::from_raw_parts(base, total);
            self.current_pack().write_span(bytes)?;
        } else {
            for i in 0..count {
                // SAFETY: caller guarantees `count` live elements.
                let element = &*slot.as_ptr().add(i);
                self.serialize(element)?;
            }
        }
        self.pack = parent;
        Ok(())
    }

    /// Overrides the resource version recorded in the header. Preset to the
    /// root type's `VERSION`; descriptors may refine it.
    pub fn set_resource_version(&mut self, version: u16) {
        self.resource_version = version;
    }

    /// The resource version that will be recorded.
    pub fn resource_version(&self) -> u16 {
        self.resource_version
    }

    /// True if this save targets the opposite endianness. Descriptors that
    /// hand-pack blob bytes may need to know.
    pub fn swap_endian(&self) -> bool {
        self.ctx.swap_endian
    }

    /// Writes a plain value's raw bytes at its layout offset within the
    /// current frame. Called by the [`Serial`] impls of plain types; user
    /// descriptors go through [`serialize`](Self::serialize).
    pub fn write_plain<T>(&mut self, value: &T) -> Result<()> {
        let addr = value as *const T as *const u8;
        let pos = u64::from(self.class_pos) + u64::from(self.local_offset(addr));
        // SAFETY: `value` is a live reference; plain types carry no
        // padding bytes (contract of `Serial::PLAIN`).
        #[allow(unsafe_code)]
        let bytes = unsafe { std::slice::from_raw_parts(addr, mem::size_of::<T>()) };
        let pack = self.current_pack();
        pack.seek_origin(pos)?;
        pack.write_span(bytes)
    }

    // -----------------------------------------------------------------
    // Frame internals
    // -----------------------------------------------------------------

    fn current_pack(&mut self) -> &mut crate::pack::PackBuffer {
        &mut self.ctx.packs[self.pack as usize]
    }

    fn is_local(&self, addr: *const u8) -> bool {
        let base = self.class_ptr as usize;
        let a = addr as usize;
        a >= base && a < base + self.class_size as usize
    }

    fn local_offset(&self, addr: *const u8) -> u32 {
        debug_assert!(
            self.is_local(addr),
            "serialized value lies outside the current frame"
        );
        (addr as usize - self.class_ptr as usize) as u32
    }

    // -----------------------------------------------------------------
    // Container assembly
    // -----------------------------------------------------------------

    fn save_file<S: ByteStream>(&mut self, stream: &mut S) -> Result<()> {
        let level = self.level;
        let WriteContext {
            packs,
            refs,
            block_sizes,
            swap_endian,
        } = &mut self.ctx;
        let swap = *swap_endian;

        // Compress every pack block by block.
        let mut entries = Vec::with_capacity(packs.len());
        let mut payloads = Vec::with_capacity(packs.len());
        for (index, pack) in packs.iter().enumerate() {
            let raw = pack.as_slice();
            let uncompressed = u32::try_from(raw.len())
                .map_err(|_| RespakError::Corrupt("pack exceeds 4 GiB".into()))?;
            let block_size = MAX_BLOCK_SIZE.min(uncompressed);

            let mut compressor = Compressor::new(block_size, raw, level);
            let mut out_block = vec![0u8; block_size as usize];
            let mut compressed = Vec::with_capacity(raw.len());
            let mut block_count = 0u32;

            loop {
                let to_compress = (raw.len() - compressor.position()).min(block_size as usize);
                let (written, state) = compressor.pack(&mut out_block)?;
                match state {
                    PackState::Incompressible => {
                        // Store the input block verbatim and record its
                        // uncompressed length as the stored size.
                        let from = compressor.last_position();
                        compressed.extend_from_slice(&raw[from..from + to_compress]);
                        block_sizes.push(to_compress as u32);
                        block_count += 1;
                    }
                    PackState::NotDone | PackState::Done => {
                        if written > 0 {
                            compressed.extend_from_slice(&out_block[..written]);
                            block_sizes.push(written as u32);
                            block_count += 1;
                        }
                        if state == PackState::Done {
                            break;
                        }
                    }
                }
            }

            log::debug!(
                "pack {index}: {uncompressed} bytes -> {} in {block_count} blocks ({} engine)",
                compressed.len(),
                compressor.engine_name()
            );
            entries.push(PackEntry {
                flags: pack.flags(),
                uncompressed_size: uncompressed,
                block_count,
            });
            payloads.push(compressed);
        }

        // Lay out the info region: packs, refs, block sizes, in that
        // exact order, endian-converted first when requested.
        let info_len = entries.len() * PackEntry::SIZE + refs.len() * Ref::SIZE
            + block_sizes.len() * 4;
        let mut info = Vec::with_capacity(info_len);
        for entry in &entries {
            let entry = if swap { entry.swapped() } else { *entry };
            info.extend_from_slice(&entry.to_bytes());
        }
        for r in refs.iter() {
            let r = if swap { r.swapped() } else { *r };
            info.extend_from_slice(&r.to_bytes());
        }
        for &size in block_sizes.iter() {
            let size = if swap { endian::swap_u32(size) } else { size };
            info.extend_from_slice(&size.to_le_bytes());
        }
        debug_assert_eq!(info.len(), info_len);

        // The info region compresses as one block sized to the whole
        // region; verbatim on incompressible.
        let info_len_u32 = u32::try_from(info_len)
            .map_err(|_| RespakError::Corrupt("info region exceeds 4 GiB".into()))?;
        let mut info_compressor = Compressor::new(info_len_u32, &info, level);
        let mut info_out = vec![0u8; info_len];
        let (info_written, info_state) = info_compressor.pack(&mut info_out)?;
        let stored_info: &[u8] = match info_state {
            PackState::Incompressible => &info,
            PackState::NotDone | PackState::Done => &info_out[..info_written],
        };

        let header = Header {
            size_of_data: 0,
            format_version: FORMAT_VERSION,
            info_size: stored_info.len() as u32,
            n_pointers: u16::try_from(refs.len())
                .map_err(|_| RespakError::Corrupt("more than 65535 refs".into()))?,
            n_packs: u16::try_from(entries.len())
                .map_err(|_| RespakError::Corrupt("more than 65535 packs".into()))?,
            n_block_sizes: u16::try_from(block_sizes.len())
                .map_err(|_| RespakError::Corrupt("more than 65535 blocks".into()))?,
            resource_version: self.resource_version,
            max_qualities: 0,
            auto_version: self.root_size as u16,
        };

        // Write header (size placeholder), info, payloads; then patch the
        // payload size back into the header.
        let base = stream.tell()?;
        let disk_header = if swap { header.swapped() } else { header };
        stream.write_span(&disk_header.to_bytes())?;
        stream.write_span(stored_info)?;
        for payload in &payloads {
            stream.write_span(payload)?;
        }

        let end = stream.tell()?;
        let size_of_data = u32::try_from(end - base - Header::SIZE as u64)
            .map_err(|_| RespakError::Corrupt("container exceeds 4 GiB".into()))?;
        let patched = if swap {
            endian::swap_u32(size_of_data)
        } else {
            size_of_data
        };
        stream.seek_origin(base + Header::SIZE_OF_DATA_OFFSET)?;
        stream.write_span(&patched.to_le_bytes())?;
        stream.seek_end(0)?;

        log::debug!(
            "saved {} packs, {} refs, {} blocks, {size_of_data} bytes after header",
            entries.len(),
            refs.len(),
            block_sizes.len()
        );
        Ok(())
    }
}
