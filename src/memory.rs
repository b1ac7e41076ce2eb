//! Allocation policy boundary for loaded packs.
//!
//! The loader allocates one destination buffer per pack through a
//! [`MemoryHandler`]. Handlers are infallible by contract: they return a
//! valid pointer or abort the process; the load path has no nullable
//! allocation branch.
//!
//! [`SystemMemory`] is the library-provided default. It serves every pack
//! from the system heap; the device-memory path is a stub (engines with a
//! real VRAM allocator supply their own handler). The default is a named
//! value ([`SYSTEM_MEMORY`]), not process-wide state: every entry point
//! takes the handler it should use.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::format::MemType;

/// Pluggable allocator used by the load engine.
pub trait MemoryHandler {
    /// Allocates `size` bytes with the given alignment for a pack of the
    /// given memory type. Must return a valid pointer or abort; returning
    /// is a promise that the memory is usable.
    fn allocate(&self, kind: MemType, size: usize, align: usize) -> NonNull<u8>;

    /// Releases an allocation made by [`allocate`](Self::allocate).
    ///
    /// `size` and `align` are the values the allocation was made with;
    /// `std::alloc`-backed handlers need the layout at deallocation.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on the same handler with the same
    /// `(size, align)`, and must not be used afterwards.
    unsafe fn release(&self, kind: MemType, ptr: NonNull<u8>, size: usize, align: usize);
}

/// Default handler: system heap for everything, stubbed device path.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

/// The library default, suitable for passing by reference wherever a
/// [`MemoryHandler`] is expected.
pub static SYSTEM_MEMORY: SystemMemory = SystemMemory;

impl MemoryHandler for SystemMemory {
    fn allocate(&self, kind: MemType, size: usize, align: usize) -> NonNull<u8> {
        if kind.vram() {
            unimplemented!("device-memory packs require a custom MemoryHandler");
        }
        debug_assert!(size > 0, "packs are never empty");
        let layout = layout_for(size, align);
        // SAFETY: layout has non-zero size.
        #[allow(unsafe_code)]
        let ptr = unsafe { alloc::alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        }
    }

    unsafe fn release(&self, kind: MemType, ptr: NonNull<u8>, size: usize, align: usize) {
        if kind.vram() {
            unimplemented!("device-memory packs require a custom MemoryHandler");
        }
        alloc::dealloc(ptr.as_ptr(), layout_for(size, align));
    }
}

fn layout_for(size: usize, align: usize) -> Layout {
    // A bad layout here is writer-side misuse, not file content.
    match Layout::from_size_align(size.max(1), align) {
        Ok(layout) => layout,
        Err(_) => unreachable!("pack layout with invalid alignment"),
    }
}

