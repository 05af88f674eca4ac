//! Btree keys: packed extent headers with a trailing pointer array.
//!
//! A key is two little-endian words, `high` and `low`, followed by as many
//! pointer words as `high` says.  The record therefore describes its own
//! length: `16 + 8 * ptr_count` bytes.
//!
//! Fields packed into `high` (bit offset, width):
//!
//! | Field       | Offset | Bits |
//! |-------------|-------:|-----:|
//! | ptr_count   | 60     | 3    |
//! | header_size | 58     | 2    |
//! | csum_type   | 56     | 2    |
//! | pinned      | 55     | 1    |
//! | dirty       | 36     | 1    |
//! | size        | 20     | 16   |
//! | inode       | 0      | 20   |
//!
//! `low` is the sector the extent ends at.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use crate::bitfield::{extract, insert};
use crate::error::{Error, Result};
use crate::layout::MAX_KEY_PTRS;

const PTRS:        (u32, u32) = (60, 3);
const HEADER_SIZE: (u32, u32) = (58, 2);
const CSUM:        (u32, u32) = (56, 2);
const PINNED:      (u32, u32) = (55, 1);
const DIRTY:       (u32, u32) = (36, 1);
const SIZE:        (u32, u32) = (20, 16);
const INODE:       (u32, u32) = (0, 20);

// ── Ptr ───────────────────────────────────────────────────────────────────────

/// One device pointer word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Ptr(pub u64);

impl Ptr {
    pub fn new(dev: u64, offset: u64, gen: u8) -> Self {
        let w = insert(0, 51, 12, dev);
        let w = insert(w, 8, 43, offset);
        Self(insert(w, 0, 8, u64::from(gen)))
    }

    /// Bucket generation the pointer was written under.
    pub fn gen(&self) -> u8 {
        extract(self.0, 0, 8) as u8
    }

    /// Device offset in sectors.
    pub fn offset(&self) -> u64 {
        extract(self.0, 8, 43)
    }

    /// Index of the cache device within its set.
    pub fn dev(&self) -> u64 {
        extract(self.0, 51, 12)
    }
}

// ── Key ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Key {
    pub high: u64,
    pub low:  u64,
    pub ptrs: Vec<Ptr>,
}

impl Key {
    /// Build an extent key covering `size` sectors that end at `offset`.
    ///
    /// Only the low 20 bits of `inode` and 16 bits of `size` are kept.
    pub fn extent(inode: u64, offset: u64, size: u64, ptrs: Vec<Ptr>) -> Self {
        debug_assert!(ptrs.len() <= MAX_KEY_PTRS);
        let high = insert(0, INODE.0, INODE.1, inode);
        let high = insert(high, SIZE.0, SIZE.1, size);
        let high = insert(high, PTRS.0, PTRS.1, ptrs.len() as u64);
        Self { high, low: offset, ptrs }
    }

    /// Decode one key, consuming exactly `16 + 8 * ptr_count` bytes.
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let high = reader.read_u64::<LittleEndian>()?;
        let low = reader.read_u64::<LittleEndian>()?;
        let n = ptr_count(high);
        if n as usize > MAX_KEY_PTRS {
            return Err(Error::TooManyPointers(n));
        }
        let mut words = [0u64; MAX_KEY_PTRS];
        reader.read_u64_into::<LittleEndian>(&mut words[..n as usize])?;
        Ok(Self {
            high,
            low,
            ptrs: words[..n as usize].iter().map(|&w| Ptr(w)).collect(),
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.high)?;
        writer.write_u64::<LittleEndian>(self.low)?;
        for p in &self.ptrs {
            writer.write_u64::<LittleEndian>(p.0)?;
        }
        Ok(())
    }

    /// Serialized length in bytes.
    pub fn encoded_len(&self) -> usize {
        16 + 8 * self.ptrs.len()
    }

    pub fn ptr_count(&self) -> u8 {
        ptr_count(self.high)
    }

    pub fn header_size(&self) -> u8 {
        extract(self.high, HEADER_SIZE.0, HEADER_SIZE.1) as u8
    }

    pub fn csum_type(&self) -> u8 {
        extract(self.high, CSUM.0, CSUM.1) as u8
    }

    pub fn pinned(&self) -> bool {
        extract(self.high, PINNED.0, PINNED.1) != 0
    }

    pub fn dirty(&self) -> bool {
        extract(self.high, DIRTY.0, DIRTY.1) != 0
    }

    /// Extent length in sectors.
    pub fn size(&self) -> u64 {
        extract(self.high, SIZE.0, SIZE.1)
    }

    pub fn inode(&self) -> u64 {
        extract(self.high, INODE.0, INODE.1)
    }

    /// Sector the extent ends at.
    pub fn offset(&self) -> u64 {
        self.low
    }

    /// Sector the extent starts at.  Saturates at zero for corrupt keys whose
    /// size exceeds their end offset.
    pub fn start(&self) -> u64 {
        self.offset().saturating_sub(self.size())
    }
}

fn ptr_count(high: u64) -> u8 {
    extract(high, PTRS.0, PTRS.1) as u8
}

// ── PaddedKey ─────────────────────────────────────────────────────────────────

/// A key stored in a fixed 64-byte slot: two header words and all pointer
/// words, used or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaddedKey {
    pub high: u64,
    pub low:  u64,
    pub slots: [u64; MAX_KEY_PTRS],
}

impl PaddedKey {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let high = reader.read_u64::<LittleEndian>()?;
        let low = reader.read_u64::<LittleEndian>()?;
        let mut slots = [0u64; MAX_KEY_PTRS];
        reader.read_u64_into::<LittleEndian>(&mut slots)?;
        Ok(Self { high, low, slots })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.high)?;
        writer.write_u64::<LittleEndian>(self.low)?;
        for s in &self.slots {
            writer.write_u64::<LittleEndian>(*s)?;
        }
        Ok(())
    }

    /// The key held in this slot.  A pointer count above the slot capacity
    /// is clamped.
    pub fn key(&self) -> Key {
        let n = (ptr_count(self.high) as usize).min(MAX_KEY_PTRS);
        Key {
            high: self.high,
            low:  self.low,
            ptrs: self.slots[..n].iter().map(|&w| Ptr(w)).collect(),
        }
    }
}

impl From<&Key> for PaddedKey {
    fn from(key: &Key) -> Self {
        let mut slots = [0u64; MAX_KEY_PTRS];
        for (slot, p) in slots.iter_mut().zip(&key.ptrs) {
            *slot = p.0;
        }
        Self { high: key.high, low: key.low, slots }
    }
}
