//! Journal recovery from raw device bytes.
//!
//! [`scanner`] finds and verifies journal sets by their magic; [`journal`]
//! orders what was found into the live journal.

pub mod journal;
pub mod scanner;

pub use journal::{live_entries, replay_keys};
pub use scanner::{
    scan, scan_all, Found, JournalScanner, ScanFailure, ScanOptions, ScanReport, ScanStats,
};
