pub mod layout;
pub mod error;
pub mod bitfield;
pub mod checksum;
pub mod superblock;
pub mod bkey;
pub mod bset;
pub mod jset;
pub mod recovery;

pub use error::{Error, Result};
pub use superblock::{Superblock, Version};
pub use bkey::{Key, PaddedKey, Ptr};
pub use bset::BsetHeader;
pub use jset::JournalSet;
pub use recovery::{scan, scan_all, JournalScanner, ScanOptions};
