//! Cache device superblock.
//!
//! # Layout
//! The superblock lives at [`SB_START`] (sector 8) and is [`SB_SIZE`] bytes,
//! all fields little-endian with no implicit padding:
//!
//! | Offset | Size | Field |
//! |-------:|-----:|-------|
//! | 0      | 8    | checksum (CRC-64 over bytes 8..) |
//! | 8      | 8    | offset (sector this copy was written at) |
//! | 16     | 8    | version |
//! | 24     | 16   | magic |
//! | 40     | 16   | uuid |
//! | 56     | 8    | set_magic |
//! | 64     | 8    | set_magic_pad (rest of the set UUID union) |
//! | 72     | 32   | label |
//! | 104    | 8    | flags |
//! | 112    | 8    | seq |
//! | 120    | 64   | reserved |
//! | 184    | 8    | nbuckets |
//! | 192    | 2×4  | block_size, bucket_size, nr_in_set, nr_this_dev |
//! | 200    | 4    | last_mount |
//! | 204    | 2    | first_bucket |
//! | 206    | 2    | nr_journal_buckets |
//! | 208    | 2048 | journal bucket array |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use uuid::Uuid;

use crate::checksum::checksum;
use crate::error::{Error, Result};
use crate::layout::{
    BCACHE_MAGIC, BSET_MAGIC, JSET_MAGIC, MIN_CACHE_BUCKETS, PSET_MAGIC, SB_JOURNAL_BUCKETS,
    SB_LABEL_SIZE, SB_SECTOR, SB_SIZE, SB_START,
};

// ── Version ───────────────────────────────────────────────────────────────────

/// Known superblock versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    CacheDevice,
    BackingDevice,
    CacheDeviceWithUuid,
    BackingDeviceWithOffset,
}

impl Version {
    pub fn as_u64(self) -> u64 {
        match self {
            Version::CacheDevice             => 0,
            Version::BackingDevice           => 1,
            Version::CacheDeviceWithUuid     => 3,
            Version::BackingDeviceWithOffset => 4,
        }
    }

    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(Version::CacheDevice),
            1 => Some(Version::BackingDevice),
            3 => Some(Version::CacheDeviceWithUuid),
            4 => Some(Version::BackingDeviceWithOffset),
            _ => None,
        }
    }

    pub fn is_backing(self) -> bool {
        matches!(self, Version::BackingDevice | Version::BackingDeviceWithOffset)
    }
}

// ── Superblock ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Superblock {
    pub checksum:           u64,
    pub offset:             u64,
    pub version:            u64,
    #[serde(serialize_with = "as_hex")]
    pub magic:              [u8; 16],
    pub uuid:               Uuid,
    pub set_magic:          u64,
    pub set_magic_pad:      u64,
    #[serde(serialize_with = "as_label")]
    pub label:              [u8; SB_LABEL_SIZE],
    pub flags:              u64,
    pub seq:                u64,
    pub reserved:           [u64; 8],

    // Cache device geometry
    pub nbuckets:           u64,
    /// Sectors per block.
    pub block_size:         u16,
    /// Sectors per bucket.
    pub bucket_size:        u16,
    pub nr_in_set:          u16,
    pub nr_this_dev:        u16,

    pub last_mount:         u32,
    pub first_bucket:       u16,
    pub nr_journal_buckets: u16,
    #[serde(skip_serializing)]
    pub journal_bucket_slots: [u64; SB_JOURNAL_BUCKETS],
}

impl Superblock {
    /// A minimal valid cache device superblock, checksum included.
    pub fn new(uuid: Uuid, set_magic: u64) -> Self {
        let mut sb = Self {
            checksum:             0,
            offset:               SB_SECTOR,
            version:              Version::CacheDeviceWithUuid.as_u64(),
            magic:                BCACHE_MAGIC,
            uuid,
            set_magic,
            set_magic_pad:        0,
            label:                [0u8; SB_LABEL_SIZE],
            flags:                0,
            seq:                  0,
            reserved:             [0u64; 8],
            nbuckets:             MIN_CACHE_BUCKETS,
            block_size:           1,
            bucket_size:          1024,
            nr_in_set:            1,
            nr_this_dev:          0,
            last_mount:           0,
            first_bucket:         1,
            nr_journal_buckets:   0,
            journal_bucket_slots: [0u64; SB_JOURNAL_BUCKETS],
        };
        sb.seal();
        sb
    }

    // ── Decoding ─────────────────────────────────────────────────────────────

    /// Read and validate the superblock of `source`.
    pub fn decode<R: Read + Seek>(source: &mut R) -> Result<Self> {
        let sb = Self::read_raw(source)?;
        sb.validate()?;
        Ok(sb)
    }

    /// Read the superblock at [`SB_START`] without validating anything.
    pub fn read_raw<R: Read + Seek>(source: &mut R) -> Result<Self> {
        source.seek(SeekFrom::Start(SB_START))?;
        let mut buf = vec![0u8; SB_SIZE];
        source.read_exact(&mut buf)?;
        Self::read(Cursor::new(buf))
    }

    /// Decode one serialized superblock from `reader`, field by field.
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let checksum = reader.read_u64::<LittleEndian>()?;
        let offset = reader.read_u64::<LittleEndian>()?;
        let version = reader.read_u64::<LittleEndian>()?;
        let mut magic = [0u8; 16];
        reader.read_exact(&mut magic)?;
        let mut uuid_bytes = [0u8; 16];
        reader.read_exact(&mut uuid_bytes)?;
        let set_magic = reader.read_u64::<LittleEndian>()?;
        let set_magic_pad = reader.read_u64::<LittleEndian>()?;
        let mut label = [0u8; SB_LABEL_SIZE];
        reader.read_exact(&mut label)?;
        let flags = reader.read_u64::<LittleEndian>()?;
        let seq = reader.read_u64::<LittleEndian>()?;
        let mut reserved = [0u64; 8];
        reader.read_u64_into::<LittleEndian>(&mut reserved)?;
        let nbuckets = reader.read_u64::<LittleEndian>()?;
        let block_size = reader.read_u16::<LittleEndian>()?;
        let bucket_size = reader.read_u16::<LittleEndian>()?;
        let nr_in_set = reader.read_u16::<LittleEndian>()?;
        let nr_this_dev = reader.read_u16::<LittleEndian>()?;
        let last_mount = reader.read_u32::<LittleEndian>()?;
        let first_bucket = reader.read_u16::<LittleEndian>()?;
        let nr_journal_buckets = reader.read_u16::<LittleEndian>()?;
        let mut journal_bucket_slots = [0u64; SB_JOURNAL_BUCKETS];
        reader.read_u64_into::<LittleEndian>(&mut journal_bucket_slots)?;
        Ok(Self {
            checksum,
            offset,
            version,
            magic,
            uuid: Uuid::from_bytes(uuid_bytes),
            set_magic,
            set_magic_pad,
            label,
            flags,
            seq,
            reserved,
            nbuckets,
            block_size,
            bucket_size,
            nr_in_set,
            nr_this_dev,
            last_mount,
            first_bucket,
            nr_journal_buckets,
            journal_bucket_slots,
        })
    }

    /// Check an already-read superblock.  Checks run in a fixed order and
    /// the first failure is returned.
    pub fn validate(&self) -> Result<()> {
        if self.offset != SB_SECTOR {
            return Err(Error::BadOffset(self.offset));
        }
        if self.magic != BCACHE_MAGIC {
            return Err(Error::BadMagic(self.magic));
        }
        if self.nr_journal_buckets as usize > SB_JOURNAL_BUCKETS {
            return Err(Error::TooManyJournalBuckets(self.nr_journal_buckets));
        }
        let computed = self.compute_checksum();
        if computed != self.checksum {
            return Err(Error::BadChecksum { stored: self.checksum, computed });
        }
        if self.uuid.is_nil() {
            return Err(Error::BadUuid);
        }
        match self.version_kind() {
            Some(Version::CacheDevice) => Ok(()),
            Some(Version::CacheDeviceWithUuid) if self.nbuckets < MIN_CACHE_BUCKETS => {
                Err(Error::TooFewBuckets(self.nbuckets))
            }
            Some(Version::CacheDeviceWithUuid) => Ok(()),
            // Backing devices are not handled by this tool.
            Some(Version::BackingDevice | Version::BackingDeviceWithOffset) | None => {
                Err(Error::UnsupportedVersion(self.version))
            }
        }
    }

    // ── Encoding ─────────────────────────────────────────────────────────────

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.checksum)?;
        writer.write_u64::<LittleEndian>(self.offset)?;
        writer.write_u64::<LittleEndian>(self.version)?;
        writer.write_all(&self.magic)?;
        writer.write_all(self.uuid.as_bytes())?;
        writer.write_u64::<LittleEndian>(self.set_magic)?;
        writer.write_u64::<LittleEndian>(self.set_magic_pad)?;
        writer.write_all(&self.label)?;
        writer.write_u64::<LittleEndian>(self.flags)?;
        writer.write_u64::<LittleEndian>(self.seq)?;
        for w in &self.reserved {
            writer.write_u64::<LittleEndian>(*w)?;
        }
        writer.write_u64::<LittleEndian>(self.nbuckets)?;
        writer.write_u16::<LittleEndian>(self.block_size)?;
        writer.write_u16::<LittleEndian>(self.bucket_size)?;
        writer.write_u16::<LittleEndian>(self.nr_in_set)?;
        writer.write_u16::<LittleEndian>(self.nr_this_dev)?;
        writer.write_u32::<LittleEndian>(self.last_mount)?;
        writer.write_u16::<LittleEndian>(self.first_bucket)?;
        writer.write_u16::<LittleEndian>(self.nr_journal_buckets)?;
        for w in &self.journal_bucket_slots {
            writer.write_u64::<LittleEndian>(*w)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SB_SIZE);
        // Writing into a Vec cannot fail.
        let _ = self.write(&mut buf);
        buf
    }

    /// Checksum of the serialized record, stored checksum field excluded.
    pub fn compute_checksum(&self) -> u64 {
        checksum(&self.to_bytes()[8..])
    }

    /// Recompute and store the checksum.
    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    // ── Derived values ───────────────────────────────────────────────────────

    pub fn version_kind(&self) -> Option<Version> {
        Version::from_u64(self.version)
    }

    pub fn is_backing_device(&self) -> bool {
        self.version_kind().is_some_and(Version::is_backing)
    }

    /// On-disk magic of this device's journal sets.
    pub fn jset_magic(&self) -> u64 {
        JSET_MAGIC ^ self.set_magic
    }

    /// On-disk magic of this device's btree node sets.
    pub fn bset_magic(&self) -> u64 {
        BSET_MAGIC ^ self.set_magic
    }

    /// On-disk magic of this device's priority sets.
    pub fn pset_magic(&self) -> u64 {
        PSET_MAGIC ^ self.set_magic
    }

    /// Byte pattern to search the device for when hunting journal sets.
    pub fn journal_pattern(&self) -> [u8; 8] {
        self.jset_magic().to_le_bytes()
    }

    pub fn label_str(&self) -> String {
        label_to_string(&self.label)
    }

    /// Journal bucket indices in use.  Clamped to the array capacity so an
    /// unvalidated superblock never indexes out of range.
    pub fn journal_buckets(&self) -> &[u64] {
        let n = (self.nr_journal_buckets as usize).min(SB_JOURNAL_BUCKETS);
        &self.journal_bucket_slots[..n]
    }

    pub fn first_sector(&self) -> u64 {
        u64::from(self.bucket_size) * u64::from(self.first_bucket)
    }

    pub fn cache_sectors(&self) -> u64 {
        u64::from(self.bucket_size) * self.nbuckets.saturating_sub(u64::from(self.first_bucket))
    }

    /// Total sectors, superblock included.
    pub fn total_sectors(&self) -> u64 {
        u64::from(self.bucket_size).saturating_mul(self.nbuckets)
    }

    pub fn last_mount_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.last_mount), 0)
    }
}

fn label_to_string(label: &[u8]) -> String {
    let end = label.iter().position(|&b| b == 0).unwrap_or(label.len());
    String::from_utf8_lossy(&label[..end]).into_owned()
}

fn as_hex<S: Serializer>(bytes: &[u8; 16], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

fn as_label<S: Serializer>(label: &[u8; SB_LABEL_SIZE], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&label_to_string(label))
}
