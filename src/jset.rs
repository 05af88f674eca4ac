//! Journal sets.
//!
//! # Layout
//! A fixed [`JSET_HEADER_SIZE`]-byte header followed directly by `key_count`
//! variable-length keys.  There is no length field; the set ends where the
//! last key ends.
//!
//! | Offset | Size | Field |
//! |-------:|-----:|-------|
//! | 0      | 8    | checksum (CRC-64 over bytes 8..end of last key) |
//! | 8      | 8    | magic (`JSET_MAGIC ^ set_magic`) |
//! | 16     | 8    | seq |
//! | 24     | 4    | version |
//! | 28     | 4    | key_count |
//! | 32     | 8    | last_seq |
//! | 40     | 64   | uuid_bucket (padded key) |
//! | 104    | 64   | btree_root (padded key) |
//! | 168    | 2    | btree_level |
//! | 170    | 6    | padding |
//! | 176    | 64   | prio_bucket, one per cache in the set |
//! | 240    | …    | keys |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use crate::bkey::{Key, PaddedKey};
use crate::checksum::checksum;
use crate::error::{Error, Result};
use crate::layout::{JSET_HEADER_SIZE, MAX_CACHES_PER_SET};

/// Version written by current kernels.
pub const JSET_VERSION: u32 = 1;

/// Keys preallocated per set before any are read.  A corrupt `key_count`
/// must not turn into a huge allocation.
const KEY_PREALLOC: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalSet {
    pub checksum:    u64,
    pub magic:       u64,
    pub seq:         u64,
    pub version:     u32,
    pub key_count:   u32,
    pub last_seq:    u64,
    pub uuid_bucket: PaddedKey,
    pub btree_root:  PaddedKey,
    pub btree_level: u16,
    pub pad:         [u16; 3],
    pub prio_bucket: [u64; MAX_CACHES_PER_SET],
    pub keys:        Vec<Key>,
}

impl JournalSet {
    /// A sealed set holding `keys`.
    pub fn new(magic: u64, seq: u64, last_seq: u64, keys: Vec<Key>) -> Self {
        let mut set = Self {
            checksum:    0,
            magic,
            seq,
            version:     JSET_VERSION,
            key_count:   keys.len() as u32,
            last_seq,
            uuid_bucket: PaddedKey::from(&Key::extent(0, 0, 0, Vec::new())),
            btree_root:  PaddedKey::from(&Key::extent(0, 0, 0, Vec::new())),
            btree_level: 0,
            pad:         [0; 3],
            prio_bucket: [0; MAX_CACHES_PER_SET],
            keys,
        };
        set.seal();
        set
    }

    /// Decode a set and verify its checksum.
    ///
    /// The magic is *not* checked: callers that located the set by its
    /// magic compare it themselves.
    pub fn decode<R: Read>(mut reader: R) -> Result<Self> {
        let checksum = reader.read_u64::<LittleEndian>()?;
        let magic = reader.read_u64::<LittleEndian>()?;
        let seq = reader.read_u64::<LittleEndian>()?;
        let version = reader.read_u32::<LittleEndian>()?;
        let key_count = reader.read_u32::<LittleEndian>()?;
        let last_seq = reader.read_u64::<LittleEndian>()?;
        let uuid_bucket = PaddedKey::read(&mut reader)?;
        let btree_root = PaddedKey::read(&mut reader)?;
        let btree_level = reader.read_u16::<LittleEndian>()?;
        let mut pad = [0u16; 3];
        reader.read_u16_into::<LittleEndian>(&mut pad)?;
        let mut prio_bucket = [0u64; MAX_CACHES_PER_SET];
        reader.read_u64_into::<LittleEndian>(&mut prio_bucket)?;

        // Each key reports its own length, so they are read one at a time.
        let mut keys = Vec::with_capacity((key_count as usize).min(KEY_PREALLOC));
        for _ in 0..key_count {
            keys.push(Key::read(&mut reader)?);
        }

        let set = Self {
            checksum,
            magic,
            seq,
            version,
            key_count,
            last_seq,
            uuid_bucket,
            btree_root,
            btree_level,
            pad,
            prio_bucket,
            keys,
        };
        let computed = set.compute_checksum();
        if computed != set.checksum {
            return Err(Error::BadChecksum { stored: set.checksum, computed });
        }
        Ok(set)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.checksum)?;
        writer.write_u64::<LittleEndian>(self.magic)?;
        writer.write_u64::<LittleEndian>(self.seq)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.key_count)?;
        writer.write_u64::<LittleEndian>(self.last_seq)?;
        self.uuid_bucket.write(&mut writer)?;
        self.btree_root.write(&mut writer)?;
        writer.write_u16::<LittleEndian>(self.btree_level)?;
        for p in &self.pad {
            writer.write_u16::<LittleEndian>(*p)?;
        }
        for b in &self.prio_bucket {
            writer.write_u64::<LittleEndian>(*b)?;
        }
        for key in &self.keys {
            key.write(&mut writer)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        // Writing into a Vec cannot fail.
        let _ = self.write(&mut buf);
        buf
    }

    /// Total serialized length, header and keys.
    pub fn encoded_len(&self) -> usize {
        JSET_HEADER_SIZE + self.keys.iter().map(Key::encoded_len).sum::<usize>()
    }

    pub fn compute_checksum(&self) -> u64 {
        checksum(&self.to_bytes()[8..])
    }

    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    pub fn uuid_bucket_key(&self) -> Key {
        self.uuid_bucket.key()
    }

    pub fn btree_root_key(&self) -> Key {
        self.btree_root.key()
    }
}
