//! End-to-end save/load round trips over the documented container
//! behavior: pack pooling, pointer fix-up, temp-data lifecycle,
//! incompressible payloads, determinism.

use std::io::Cursor;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use respak::codec::Decompressor;
use respak::format::{Header, PackEntry, Ref, MAX_BLOCK_SIZE};
use respak::{
    CompressionLevel, DataPtr, IoStream, MemType, Resolver, Respak, Result, Saver, Serial,
};

// --- MOCK DATA STRUCTURES ---

/// Smallest serializable unit: one i16.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
struct Sample {
    value: i16,
}

impl Serial for Sample {
    fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
        s.serialize(&self.value)
    }
}

/// A counted array: count + owning pointer.
#[repr(C)]
struct Table {
    count: u64,
    items: DataPtr<Sample>,
}

impl Serial for Table {
    fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
        s.serialize(&self.count)?;
        // SAFETY: `items` points at `count` live elements in every fixture.
        unsafe { s.serialize_ptr(&self.items, self.count as usize, MemType::NONE) }
    }
}

/// A raw byte blob: count + owning pointer, flags chosen per test.
#[repr(C)]
struct Blob {
    len: u64,
    bytes: DataPtr<u8>,
}

impl Serial for Blob {
    const VERSION: u16 = 2;

    fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
        s.serialize(&self.len)?;
        // SAFETY: `bytes` points at `len` live bytes in every fixture.
        unsafe { s.serialize_ptr(&self.bytes, self.len as usize, MemType::UNIQUE) }
    }
}

// --- CONTAINER PARSING HELPERS ---
// Tests assert pack/ref layout by parsing the written container through
// the public format and codec APIs; there are no test-only back doors.

fn parse_container(bytes: &[u8]) -> (Header, Vec<PackEntry>, Vec<Ref>, Vec<u32>) {
    let header = Header::from_bytes(bytes).unwrap();
    assert_eq!(
        header.size_of_data as usize,
        bytes.len() - Header::SIZE,
        "size_of_data covers everything after the header"
    );

    let info_len = header.info_region_len();
    let stored = header.info_size as usize;
    let stored_bytes = &bytes[Header::SIZE..Header::SIZE + stored];
    let info: Vec<u8> = if stored < info_len {
        let mut out = vec![0u8; info_len];
        let written = Decompressor::new(info_len as u32)
            .unpack(&mut out, stored_bytes)
            .unwrap();
        assert_eq!(written, info_len);
        out
    } else {
        stored_bytes.to_vec()
    };

    let mut offset = 0;
    let mut entries = Vec::new();
    for _ in 0..header.n_packs {
        entries.push(PackEntry::from_bytes(&info[offset..]).unwrap());
        offset += PackEntry::SIZE;
    }
    let mut refs = Vec::new();
    for _ in 0..header.n_pointers {
        refs.push(Ref::from_bytes(&info[offset..]).unwrap());
        offset += Ref::SIZE;
    }
    let mut block_sizes = Vec::new();
    for _ in 0..header.n_block_sizes {
        block_sizes.push(u32::from_le_bytes(info[offset..offset + 4].try_into().unwrap()));
        offset += 4;
    }
    (header, entries, refs, block_sizes)
}

fn unpack_payloads(
    bytes: &[u8],
    header: &Header,
    entries: &[PackEntry],
    block_sizes: &[u32],
) -> Vec<Vec<u8>> {
    let mut pos = Header::SIZE + header.info_size as usize;
    let mut blocks = block_sizes.iter();
    let mut payloads = Vec::new();
    for entry in entries {
        let block_size = MAX_BLOCK_SIZE.min(entry.uncompressed_size);
        let mut out: Vec<u8> = Vec::new();
        for _ in 0..entry.block_count {
            let len = *blocks.next().unwrap() as usize;
            let src = &bytes[pos..pos + len];
            let verbatim = len as u32 == block_size
                || out.len() + len == entry.uncompressed_size as usize;
            if verbatim {
                out.extend_from_slice(src);
            } else {
                let mut tmp = vec![0u8; block_size as usize];
                let n = Decompressor::new(block_size).unpack(&mut tmp, src).unwrap();
                out.extend_from_slice(&tmp[..n]);
            }
            pos += len;
        }
        assert_eq!(out.len(), entry.uncompressed_size as usize);
        payloads.push(out);
    }
    assert_eq!(pos, bytes.len(), "payloads account for the whole file");
    payloads
}

fn save_to_vec<T: Serial>(respak: &Respak<'_>, root: &T) -> Vec<u8> {
    let mut stream = IoStream::new(Cursor::new(Vec::new()));
    respak.save_stream(&mut stream, root).unwrap();
    stream.into_inner().into_inner()
}

// --- TESTS ---

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

#[test]
fn flat_scalar_struct() {
    let bytes = save_to_vec(&Respak::new(), &Flat { a: 100 });

    let (header, entries, refs, block_sizes) = parse_container(&bytes);
    assert_eq!(header.n_packs, 1);
    assert_eq!(header.n_pointers, 0);
    assert_eq!(header.n_block_sizes, 1);
    assert_eq!(header.resource_version, 1);
    assert_eq!(entries[0].uncompressed_size, 2);
    assert_eq!(entries[0].block_count, 1);
    assert!(refs.is_empty());
    assert_eq!(block_sizes.len(), 1);

    let mut stream = IoStream::new(Cursor::new(bytes));
    let loaded = unsafe { Respak::new().load_stream::<Flat, _>(&mut stream).unwrap() };
    assert_eq!(loaded.a, 100);
    assert_eq!(loaded.resource_version(), 1);
}

#[test]
fn single_dynamic_array_gets_its_own_pack() {
    let mut data: Vec<u8> = (0u8..16).collect();
    let blob = Blob {
        len: 16,
        bytes: DataPtr::from_slice(&mut data),
    };
    let bytes = save_to_vec(&Respak::new(), &blob);

    let (header, entries, refs, _) = parse_container(&bytes);
    assert_eq!(header.n_packs, 2, "root pack plus one unique pack");
    assert_eq!(header.n_pointers, 1);
    assert!(entries[1].flags.unique());
    assert_eq!(entries[1].uncompressed_size, 16);

    let r = refs[0];
    assert_eq!(r.count, 16);
    assert_eq!(r.offset_pack, 0);
    assert_eq!(r.pointing_at_pack, 1);
    assert_eq!(r.offset, 8, "slot sits after the u64 length");
    assert_eq!(r.pointing_at, 0);

    let mut stream = IoStream::new(Cursor::new(bytes));
    let loaded = unsafe { Respak::new().load_stream::<Blob, _>(&mut stream).unwrap() };
    assert_eq!(loaded.len, 16);
    let pointee = unsafe { loaded.bytes.as_slice(16) };
    assert_eq!(pointee, &data[..]);
}

/// Eight sibling arrays with identical temp flags share one pack.
#[repr(C)]
struct TempForest {
    tables: [Table; 8],
}

impl Serial for TempForest {
    const VERSION: u16 = 3;

    fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
        for table in &self.tables {
            s.serialize(&table.count)?;
            // SAFETY: each table points at `count` live elements.
            unsafe { s.serialize_ptr(&table.items, table.count as usize, MemType::TEMP)? };
        }
        Ok(())
    }

    fn resolve(&mut self, resolver: &mut Resolver<'_>) {
        // Keep the temp pack alive so the test can look at it.
        resolver.dont_free_temp_data();
    }
}

#[test]
fn pooled_temp_siblings_share_one_pack() {
    let mut backing: Vec<Vec<Sample>> = (0..8)
        .map(|t| {
            (0..50)
                .map(|i| Sample {
                    value: (t * 100 + i) as i16,
                })
                .collect()
        })
        .collect();
    let mut tables = backing.iter_mut().map(|items| Table {
        count: items.len() as u64,
        items: DataPtr::from_slice(items),
    });
    let forest = TempForest {
        tables: std::array::from_fn(|_| tables.next().unwrap()),
    };

    let bytes = save_to_vec(&Respak::new(), &forest);
    let (header, entries, refs, _) = parse_container(&bytes);
    assert_eq!(header.n_packs, 2, "root pack plus one pooled temp pack");
    assert_eq!(header.n_pointers, 8);
    assert!(entries[1].flags.temp());
    assert!(refs.iter().all(|r| r.pointing_at_pack == 1));
    assert!(refs.iter().all(|r| r.offset_pack == 0));

    let mut stream = IoStream::new(Cursor::new(bytes));
    let loaded = unsafe {
        Respak::new()
            .load_stream::<TempForest, _>(&mut stream)
            .unwrap()
    };
    assert!(loaded.temp_data().is_some(), "hook claimed the temp pack");
    for (t, table) in loaded.tables.iter().enumerate() {
        assert_eq!(table.count, 50);
        let items = unsafe { table.items.as_slice(50) };
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.value, (t * 100 + i) as i16);
        }
    }
}

// --- THE MIXED FIXTURE ---
// One pooled static array, one unique array, eight temp arrays: three
// packs in total. Mirrors the classic save-game shape: shared tables in
// the root allocation, per-instance data in its own allocation, loader
// scratch in a throwaway pack.

const STATIC_COUNT: usize = 1_000;
const DYNAMIC_COUNT: usize = 60_000; // > 64 KiB of samples: multi-block pack

#[repr(C)]
struct Level {
    value: i16,
    in_static: Table,
    dynamic_count: u64,
    dynamic_items: DataPtr<Sample>,
    temps: [Table; 8],
}

impl Serial for Level {
    const VERSION: u16 = 1;

    fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
        s.set_resource_version(1);
        s.serialize(&self.in_static)?;
        s.serialize(&self.dynamic_count)?;
        // SAFETY: `dynamic_items` points at `dynamic_count` live elements.
        unsafe {
            s.serialize_ptr(
                &self.dynamic_items,
                self.dynamic_count as usize,
                MemType::UNIQUE,
            )?
        };
        for temp in &self.temps {
            s.serialize(&temp.count)?;
            // SAFETY: each temp table points at `count` live elements.
            unsafe { s.serialize_ptr(&temp.items, temp.count as usize, MemType::TEMP)? };
        }
        s.serialize(&self.value)
    }

    fn resolve(&mut self, resolver: &mut Resolver<'_>) {
        assert_eq!(resolver.resource_version(), 1);
        assert!(resolver.temp_data().is_some());
        // Temp data is consumed here, before the loader releases it.
        for temp in &self.temps {
            let items = unsafe { temp.items.as_slice(temp.count as usize) };
            for (i, item) in items.iter().enumerate() {
                assert_eq!(item.value, (100 / (i + 1)) as i16);
            }
        }
    }
}

struct LevelFixture {
    level: Level,
    _static_items: Vec<Sample>,
    _dynamic_items: Vec<Sample>,
    _temp_items: Vec<Vec<Sample>>,
}

fn build_level() -> LevelFixture {
    let mut static_items: Vec<Sample> = (0..STATIC_COUNT)
        .map(|i| Sample {
            value: (100 / (i + 1)) as i16,
        })
        .collect();
    let mut dynamic_items: Vec<Sample> = (0..DYNAMIC_COUNT)
        .map(|i| Sample {
            value: (22 + i) as i16,
        })
        .collect();
    let mut temp_items: Vec<Vec<Sample>> = (0..8)
        .map(|_| {
            (0..STATIC_COUNT)
                .map(|i| Sample {
                    value: (100 / (i + 1)) as i16,
                })
                .collect()
        })
        .collect();

    let mut temp_tables = temp_items.iter_mut().map(|items| Table {
        count: items.len() as u64,
        items: DataPtr::from_slice(items),
    });
    let level = Level {
        value: 100,
        in_static: Table {
            count: static_items.len() as u64,
            items: DataPtr::from_slice(&mut static_items),
        },
        dynamic_count: dynamic_items.len() as u64,
        dynamic_items: DataPtr::from_slice(&mut dynamic_items),
        temps: std::array::from_fn(|_| temp_tables.next().unwrap()),
    };
    drop(temp_tables);

    LevelFixture {
        level,
        _static_items: static_items,
        _dynamic_items: dynamic_items,
        _temp_items: temp_items,
    }
}

#[test]
fn mixed_unique_and_pooled_level() {
    let fixture = build_level();
    let bytes = save_to_vec(&Respak::new(), &fixture.level);

    let (header, entries, refs, _) = parse_container(&bytes);
    assert_eq!(header.n_packs, 3, "root+static, unique, temp");
    assert_eq!(header.n_pointers, 10);
    assert_eq!(header.auto_version, std::mem::size_of::<Level>() as u16);
    assert!(!entries[0].flags.unique() && !entries[0].flags.temp());
    assert!(entries[1].flags.unique());
    assert!(entries[2].flags.temp());
    // The pooled static array lands in the root pack, 8-aligned past the
    // root value.
    let static_ref = refs[0];
    assert_eq!(static_ref.pointing_at_pack, 0);
    assert_eq!(static_ref.pointing_at as usize, std::mem::size_of::<Level>());
    // The multi-block unique pack really is multi-block.
    assert!(entries[1].block_count > 1);

    let mut stream = IoStream::new(Cursor::new(bytes));
    let loaded = unsafe { Respak::new().load_stream::<Level, _>(&mut stream).unwrap() };

    assert_eq!(loaded.value, 100);
    assert_eq!(loaded.in_static.count as usize, STATIC_COUNT);
    let statics = unsafe { loaded.in_static.items.as_slice(STATIC_COUNT) };
    for (i, item) in statics.iter().enumerate() {
        assert_eq!(item.value, (100 / (i + 1)) as i16);
    }
    assert_eq!(loaded.dynamic_count as usize, DYNAMIC_COUNT);
    let dynamics = unsafe { loaded.dynamic_items.as_slice(DYNAMIC_COUNT) };
    for (i, item) in dynamics.iter().enumerate() {
        assert_eq!(item.value, (22 + i) as i16);
    }
    // The hook did not claim the temp pack, so the loader released it.
    assert!(loaded.temp_data().is_none());
}

#[test]
fn incompressible_payload_is_stored_verbatim() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut data = vec![0u8; 128 * 1024];
    rng.fill_bytes(&mut data);

    let blob = Blob {
        len: data.len() as u64,
        bytes: DataPtr::from_slice(&mut data),
    };
    let bytes = save_to_vec(&Respak::new().level(CompressionLevel::Medium), &blob);

    let (header, entries, _, block_sizes) = parse_container(&bytes);
    assert_eq!(entries[1].uncompressed_size, 128 * 1024);
    assert_eq!(entries[1].block_count, 2, "two 64 KiB blocks");
    // Pack 0 owns the first block-size entry; the blob's two come after.
    let blob_blocks = &block_sizes[entries[0].block_count as usize..];
    assert_eq!(blob_blocks, &[MAX_BLOCK_SIZE, MAX_BLOCK_SIZE], "both verbatim");

    let payloads = unpack_payloads(&bytes, &header, &entries, &block_sizes);
    assert_eq!(payloads[1], data);

    let mut stream = IoStream::new(Cursor::new(bytes));
    let loaded = unsafe { Respak::new().load_stream::<Blob, _>(&mut stream).unwrap() };
    let pointee = unsafe { loaded.bytes.as_slice(data.len()) };
    assert_eq!(pointee, &data[..]);
}

#[repr(C)]
struct MaybeBlob {
    len: u64,
    bytes: DataPtr<u8>,
}

impl Serial for MaybeBlob {
    fn describe(&self, s: &mut Saver<'_>) -> Result<()> {
        s.serialize(&self.len)?;
        // SAFETY: null is paired with len == 0; otherwise `len` live bytes.
        unsafe { s.serialize_ptr(&self.bytes, self.len as usize, MemType::NONE) }
    }
}

#[test]
fn null_pointer_writes_eight_zero_bytes_and_no_ref() {
    let blob = MaybeBlob {
        len: 0,
        bytes: DataPtr::null(),
    };
    let bytes = save_to_vec(&Respak::new(), &blob);

    let (header, entries, refs, block_sizes) = parse_container(&bytes);
    assert_eq!(header.n_packs, 1);
    assert!(refs.is_empty());

    let payloads = unpack_payloads(&bytes, &header, &entries, &block_sizes);
    assert_eq!(&payloads[0][8..16], &[0u8; 8], "slot is eight zero bytes");

    let mut stream = IoStream::new(Cursor::new(bytes));
    let loaded = unsafe {
        Respak::new()
            .load_stream::<MaybeBlob, _>(&mut stream)
            .unwrap()
    };
    assert_eq!(loaded.len, 0);
    assert!(loaded.bytes.is_null());
}

#[test]
fn resaving_the_same_graph_is_byte_identical() {
    let fixture = build_level();
    let first = save_to_vec(&Respak::new(), &fixture.level);
    let second = save_to_vec(&Respak::new(), &fixture.level);
    assert_eq!(first, second);
}

#[test]
fn save_and_load_through_files() {
    let fixture = build_level();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("level.pak");

    Respak::save(&path, &fixture.level).unwrap();
    let loaded = unsafe { Respak::load::<Level, _>(&path).unwrap() };
    assert_eq!(loaded.value, 100);
    assert_eq!(loaded.dynamic_count as usize, DYNAMIC_COUNT);
}

#[test]
fn every_compression_level_round_trips() {
    let fixture = build_level();
    for level in [
        CompressionLevel::Fast,
        CompressionLevel::Low,
        CompressionLevel::Medium,
        CompressionLevel::High,
    ] {
        let bytes = save_to_vec(&Respak::new().level(level), &fixture.level);
        let mut stream = IoStream::new(Cursor::new(bytes));
        let loaded =
            unsafe { Respak::new().load_stream::<Level, _>(&mut stream).unwrap() };
        assert_eq!(loaded.value, 100, "level {level:?}");
    }
}
