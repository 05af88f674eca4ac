//! Btree node set header.
//!
//! Btree nodes are written as a run of sets, each starting with this 32-byte
//! header.  The magic is per-device: see [`Superblock::bset_magic`].
//!
//! [`Superblock::bset_magic`]: crate::superblock::Superblock::bset_magic

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BsetHeader {
    pub checksum:  u64,
    pub magic:     u64,
    pub seq:       u64,
    pub version:   u32,
    /// Length of the key region in 64-bit words.
    pub key_words: u32,
}

impl BsetHeader {
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        Ok(Self {
            checksum:  reader.read_u64::<LittleEndian>()?,
            magic:     reader.read_u64::<LittleEndian>()?,
            seq:       reader.read_u64::<LittleEndian>()?,
            version:   reader.read_u32::<LittleEndian>()?,
            key_words: reader.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.checksum)?;
        writer.write_u64::<LittleEndian>(self.magic)?;
        writer.write_u64::<LittleEndian>(self.seq)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.key_words)?;
        Ok(())
    }

    /// Byte length of the key region that follows the header.
    pub fn key_bytes(&self) -> u64 {
        u64::from(self.key_words) * 8
    }
}
