//! The user descriptor contract: how types describe themselves to the
//! save walker.
//!
//! This is distinct from field-by-field encoding. A descriptor does not
//! produce bytes; it tells the engine *where the value's pieces live*, and
//! the engine copies them at their in-memory layout offsets. The on-disk
//! image is the in-memory image, which is what makes load-in-place work.
//!
//! ## Writing a descriptor
//!
//! ```rust,ignore
//! #[repr(C)]
//! struct Mesh {
//!     vertex_count: u64,
//!     vertices: DataPtr<Vertex>,
//! }
//!
//! impl Serial for Mesh {
//!     const VERSION: u16 = 3;
//!
//!     fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
//!         s.serialize(&self.vertex_count)?;
//!         // SAFETY: `vertices` points at `vertex_count` live elements.
//!         unsafe { s.serialize_ptr(&self.vertices, self.vertex_count as usize, MemType::NONE) }
//!     }
//! }
//! ```
//!
//! Rules of the road:
//!
//! * Field order inside `describe` does not matter; every field lands at
//!   its layout offset regardless.
//! * Types must be `#[repr(C)]` (or otherwise layout-stable): the reader
//!   reconstructs the struct by layout, not by parse.
//! * Owning pointers must be declared as [`DataPtr<T>`] and walked with
//!   `serialize_ptr`; a pointer field serialized as a scalar would persist
//!   a meaningless address.
//! * Fields not mentioned in `describe` come back zeroed (they occupy
//!   reserve filler on disk).
//!
//! Plain types (integers, floats, `bool`, fixed arrays of plain types)
//! are copied as raw bytes and already implement [`Serial`]. User POD
//! structs and `#[repr(...)]` enums with no pointers inside can opt into
//! the same treatment with [`plain_serial!`](crate::plain_serial).
//!
//! [`DataPtr<T>`]: crate::format::DataPtr

use crate::error::Result;
use crate::loader::Resolver;
use crate::saver::Saver;

/// A type the save walker can visit.
///
/// Implemented by hand for compound resource types (the *descriptor*), by
/// the crate for primitives and fixed arrays, and by
/// [`plain_serial!`](crate::plain_serial) for user POD types.
pub trait Serial {
    /// User version tag for this type. The root type's value is written to
    /// the container as `resource_version` and checked at load.
    const VERSION: u16 = 0;

    /// Plain types are copied as `size_of::<Self>()` raw bytes; the walker
    /// never calls [`describe`](Self::describe) on runs of them. Compound
    /// types leave this `false` and get frame-based walking.
    const PLAIN: bool = false;

    /// Walks the value: calls back into the [`Saver`] for every field that
    /// should be persisted.
    fn describe(&self, s: &mut Saver<'_>) -> Result<()>;

    /// Post-load hook, invoked on the root after every pointer has been
    /// resolved. The place to fix up runtime-only state and to consume or
    /// claim `temp` data through the [`Resolver`].
    fn resolve(&mut self, resolver: &mut Resolver<'_>) {
        let _ = resolver;
    }
}

macro_rules! primitive_serial {
    ($($t:ty),* $(,)?) => {$(
        impl Serial for $t {
            const PLAIN: bool = true;

            fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
                s.write_plain(self)
            }
        }
    )*};
}

primitive_serial!(u8, i8, u16, i16, u32, i32, u64, i64, usize, isize, f32, f64, bool);

impl<T: Serial, const N: usize> Serial for [T; N] {
    const PLAIN: bool = T::PLAIN;

    fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
        for item in self {
            s.serialize(item)?;
        }
        Ok(())
    }
}

/// Marks user types as plain: copied as raw bytes, no descriptor walk.
///
/// For `#[repr(C)]` POD structs and `#[repr(...)]` enums that contain no
/// pointers. The type's bytes go to disk verbatim, so anything with
/// indirection or host-specific content inside does not belong here.
///
/// ```rust,ignore
/// #[repr(u8)]
/// #[derive(Clone, Copy)]
/// enum SurfaceKind { Opaque, Cutout, Transparent }
///
/// respak::plain_serial!(SurfaceKind);
/// ```
#[macro_export]
macro_rules! plain_serial {
    ($($t:ty),* $(,)?) => {$(
        impl $crate::Serial for $t {
            const PLAIN: bool = true;

            fn describe(&self, s: &mut $crate::Saver<'_>) -> $crate::Result<()> {
                s.write_plain(self)
            }
        }
    )*};
}
