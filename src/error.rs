use std::io;
use thiserror::Error;

/// Everything that can go wrong while decoding or scanning a cache device.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not a bcache superblock: bad magic {}", hex::encode(.0))]
    BadMagic([u8; 16]),
    #[error("Superblock claims to live at sector {0}, expected {expected}", expected = crate::layout::SB_SECTOR)]
    BadOffset(u64),
    #[error("Bad checksum: stored {stored:016x}, computed {computed:016x}")]
    BadChecksum { stored: u64, computed: u64 },
    #[error("Bad UUID: all zero")]
    BadUuid,
    #[error("Too many journal buckets: {0}")]
    TooManyJournalBuckets(u16),
    #[error("Not enough buckets: {0}")]
    TooFewBuckets(u64),
    #[error("Unsupported superblock version: {0}")]
    UnsupportedVersion(u64),
    #[error("Key claims {0} pointers, at most {max} allowed", max = crate::layout::MAX_KEY_PTRS)]
    TooManyPointers(u8),
    #[error("Set magic mismatch: expected {expected:016x}, found {found:016x}")]
    BadSetMagic { expected: u64, found: u64 },
    #[error("Record truncated")]
    Truncated,
    #[error("Invalid scan options: {0}")]
    InvalidOptions(String),
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl Error {
    /// Whether a scan may skip past this failure and keep going.
    ///
    /// Only a failing data source or a bad configuration stops a scan.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Io(_) | Error::InvalidOptions(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Truncated
        } else {
            Error::Io(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
