//! Fixed on-disk layout constants for bcache cache devices.
//!
//! Every codec in this crate reads its offsets, sizes and magic values from
//! here.  Nothing in this module is mutable at runtime.
//!
//! # Endianness
//! All multi-byte integers on disk are little-endian.

// ── Geometry ──────────────────────────────────────────────────────────────────

/// Bytes per sector.  All sector-denominated fields use this unit.
pub const SECTOR_SIZE: u64 = 512;

/// Sector the superblock is written at.  Also the value the superblock's own
/// `offset` field must hold.
pub const SB_SECTOR: u64 = 8;

/// Byte offset of the superblock from the start of the device.
pub const SB_START: u64 = SB_SECTOR * SECTOR_SIZE;

pub const SB_LABEL_SIZE: usize = 32;

/// Capacity of the superblock's journal bucket array.
pub const SB_JOURNAL_BUCKETS: usize = 256;

/// Serialized superblock size in bytes, journal bucket array included.
pub const SB_SIZE: usize = 208 + SB_JOURNAL_BUCKETS * 8;

/// A cache device with the UUID-format superblock must have at least this
/// many buckets.
pub const MIN_CACHE_BUCKETS: u64 = 1 << 7;

pub const MAX_CACHES_PER_SET: usize = 8;

/// Upper bound on the pointer words a key may carry.
pub const MAX_KEY_PTRS: usize = 6;

/// A key slot in a journal set header is padded to this many 64-bit words
/// (two header words plus [`MAX_KEY_PTRS`] pointer words).
pub const PADDED_KEY_WORDS: usize = 2 + MAX_KEY_PTRS;

/// Serialized size of the fixed part of a journal set.
pub const JSET_HEADER_SIZE: usize = 40 + 2 * PADDED_KEY_WORDS * 8 + 8 + MAX_CACHES_PER_SET * 8;

/// Byte distance from the start of a journal set to its magic field.
pub const JSET_MAGIC_OFFSET: u64 = 8;

/// Serialized size of a btree set header.
pub const BSET_HEADER_SIZE: usize = 32;

// ── Magic values ──────────────────────────────────────────────────────────────

/// Superblock magic, stored verbatim.
pub const BCACHE_MAGIC: [u8; 16] = [
    0xc6, 0x85, 0x73, 0xf6, 0x4e, 0x1a, 0x45, 0xca,
    0x82, 0x65, 0xf5, 0x7f, 0x48, 0xba, 0x6d, 0x81,
];

/// Journal set magic seed.  The on-disk value is `JSET_MAGIC ^ set_magic`.
pub const JSET_MAGIC: u64 = 0x245235c1a3625032;

/// Btree set magic seed.  The on-disk value is `BSET_MAGIC ^ set_magic`.
pub const BSET_MAGIC: u64 = 0x90135c78b99e07f6;

/// Priority set magic seed.  The on-disk value is `PSET_MAGIC ^ set_magic`.
pub const PSET_MAGIC: u64 = 0x6750e15f87337f91;
