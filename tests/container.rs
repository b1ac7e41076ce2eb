//! Container-level robustness: version triage, endianness handling,
//! header tampering. Nothing here should ever reach undefined behavior;
//! a bad header must come back as a typed error.

use std::io::Cursor;

use respak::format::Header;
use respak::{IoStream, RespakError, Respak, Result, Saver, Serial};

#[repr(C)]
struct Flat {
    a: i16,
}

impl Serial for Flat {
    const VERSION: u16 = 1;

    fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
        s.serialize(&self.a)
    }
}

/// Same size and layout as [`Flat`], different resource version.
#[repr(C)]
struct FlatV9 {
    a: i16,
}

impl Serial for FlatV9 {
    const VERSION: u16 = 9;

    fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
        s.serialize(&self.a)
    }
}

fn saved_flat(swap_endian: bool) -> Vec<u8> {
    let mut stream = IoStream::new(Cursor::new(Vec::new()));
    Respak::new()
        .swap_endian(swap_endian)
        .save_stream(&mut stream, &Flat { a: 100 })
        .unwrap();
    stream.into_inner().into_inner()
}

fn load_flat(bytes: Vec<u8>) -> Result<i16> {
    let mut stream = IoStream::new(Cursor::new(bytes));
    let loaded = unsafe { Respak::new().load_stream::<Flat, _>(&mut stream)? };
    Ok(loaded.a)
}

fn swap16_in_place(bytes: &mut [u8], at: usize) {
    bytes.swap(at, at + 1);
}

fn swap32_in_place(bytes: &mut [u8], at: usize) {
    bytes.swap(at, at + 3);
    bytes.swap(at + 1, at + 2);
}

#[test]
fn native_save_loads() {
    assert_eq!(load_flat(saved_flat(false)).unwrap(), 100);
}

#[test]
fn endian_flipped_save_is_refused() {
    let err = load_flat(saved_flat(true)).unwrap_err();
    assert!(
        matches!(err, RespakError::WrongVersion(_)),
        "opposite-endian file must be WrongVersion, got {err:?}"
    );
}

#[test]
fn flipping_the_header_alone_is_wrong_version() {
    let mut bytes = saved_flat(false);
    // Byte-swap every header field in place: u32, u16, u32, then six u16s.
    swap32_in_place(&mut bytes, 0);
    swap16_in_place(&mut bytes, 4);
    swap32_in_place(&mut bytes, 6);
    for at in [10, 12, 14, 16, 18, 20] {
        swap16_in_place(&mut bytes, at);
    }
    let err = load_flat(bytes).unwrap_err();
    assert!(matches!(err, RespakError::WrongVersion(_)), "got {err:?}");
}

#[test]
fn corrupt_format_version_is_unknown_file_type() {
    let mut bytes = saved_flat(false);
    bytes[4..6].copy_from_slice(&0xBEEFu16.to_le_bytes());
    let err = load_flat(bytes).unwrap_err();
    assert!(matches!(err, RespakError::UnknownFileType), "got {err:?}");
}

#[test]
fn auto_version_mismatch_is_wrong_version() {
    let mut bytes = saved_flat(false);
    let header = Header::from_bytes(&bytes).unwrap();
    bytes[20..22].copy_from_slice(&(header.auto_version + 1).to_le_bytes());
    let err = load_flat(bytes).unwrap_err();
    assert!(matches!(err, RespakError::WrongVersion(_)), "got {err:?}");
}

#[test]
fn resource_version_mismatch_is_wrong_version() {
    let bytes = saved_flat(false);
    let mut stream = IoStream::new(Cursor::new(bytes));
    let err = unsafe {
        Respak::new()
            .load_stream::<FlatV9, _>(&mut stream)
            .unwrap_err()
    };
    assert!(matches!(err, RespakError::WrongVersion(_)), "got {err:?}");
}

#[test]
fn truncated_file_is_an_io_error() {
    let mut bytes = saved_flat(false);
    bytes.truncate(Header::SIZE - 4);
    let err = load_flat(bytes).unwrap_err();
    assert!(matches!(err, RespakError::Io(_)), "got {err:?}");
}

#[test]
fn truncated_payload_is_reported() {
    let mut bytes = saved_flat(false);
    bytes.truncate(Header::SIZE + 2);
    assert!(load_flat(bytes).is_err());
}

#[test]
fn garbage_is_unknown_file_type() {
    let mut bytes = vec![0x5Au8; 64];
    // Not the version, not its byte-swap.
    bytes[4..6].copy_from_slice(&0x1234u16.to_le_bytes());
    let err = load_flat(bytes).unwrap_err();
    assert!(matches!(err, RespakError::UnknownFileType), "got {err:?}");
}

#[test]
fn corrupt_info_size_is_reported() {
    let mut bytes = saved_flat(false);
    // Claim a stored info size larger than the uncompressed tables.
    bytes[6..10].copy_from_slice(&u32::MAX.to_le_bytes());
    let err = load_flat(bytes).unwrap_err();
    assert!(matches!(err, RespakError::Corrupt(_)), "got {err:?}");
}

#[test]
fn corrupt_block_size_is_reported() {
    let mut bytes = saved_flat(false);
    let header = Header::from_bytes(&bytes).unwrap();
    // A 13-byte info region cannot shrink under LZ4's end-of-block rules,
    // so it is stored uncompressed and its last four bytes are the
    // block-size table. Poison it.
    assert_eq!(header.info_size as usize, header.info_region_len());
    let info_end = Header::SIZE + header.info_size as usize;
    bytes[info_end - 4..info_end].copy_from_slice(&u32::MAX.to_le_bytes());
    let err = load_flat(bytes).unwrap_err();
    assert!(matches!(err, RespakError::Corrupt(_)), "got {err:?}");
}
