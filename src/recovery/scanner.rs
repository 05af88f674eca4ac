//! Magic-pattern scanner: find journal sets anywhere on a device.
//!
//! # How it works
//!
//! Journal sets can sit anywhere in the journal buckets, and on a damaged
//! device the superblock's bucket list cannot be trusted.  The scanner
//! therefore ignores device structure entirely.  It streams the source in
//! fixed-size chunks, searches each chunk for the device's journal magic, and
//! tries to decode a set 8 bytes before every hit (the magic follows the
//! checksum field).
//!
//! Consecutive chunks overlap by `pattern.len() - 1` bytes, so a pattern that
//! straddles a chunk boundary is found exactly once, in the later chunk.
//!
//! ## Failure handling
//!
//! | Failure at a hit | Effect |
//! |------------------|--------|
//! | bad checksum, truncated set, bad key header, magic mismatch | recorded as a [`ScanFailure`], scan continues |
//! | I/O error from the source | yielded once as `Err`, scan stops |
//!
//! Every hit is decoded independently; overlapping hits are not merged.

use std::collections::VecDeque;
use std::io::{self, BufReader, Read, Seek, SeekFrom};

use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::jset::JournalSet;
use crate::layout::JSET_MAGIC_OFFSET;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE:    usize = 1024 * 1024;
/// Default decode window per candidate set: 4 MiB.
pub const DEFAULT_MAX_SET_BYTES: u64   = 4 * 1024 * 1024;

// ── ScanOptions ───────────────────────────────────────────────────────────────

/// Configuration for [`JournalScanner`].
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Bytes read per chunk.  Must exceed the pattern length.
    pub chunk_size:    usize,
    /// Stop after this many sets have been yielded.
    pub max_results:   usize,
    /// Device byte offset the scan starts at.
    pub start_offset:  u64,
    /// A candidate set may span at most this many bytes; anything longer is
    /// reported as truncated.
    pub max_set_bytes: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            chunk_size:    DEFAULT_CHUNK_SIZE,
            max_results:   usize::MAX,
            start_offset:  0,
            max_set_bytes: DEFAULT_MAX_SET_BYTES,
        }
    }
}

impl ScanOptions {
    pub fn validate(&self, pattern: &[u8]) -> Result<()> {
        if pattern.is_empty() {
            return Err(Error::InvalidOptions("empty search pattern".into()));
        }
        if self.chunk_size <= pattern.len() {
            return Err(Error::InvalidOptions(format!(
                "chunk size {} must exceed pattern length {}",
                self.chunk_size,
                pattern.len()
            )));
        }
        Ok(())
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

/// A decoded, checksum-verified journal set and where it was found.
#[derive(Debug, Clone, Serialize)]
pub struct Found {
    /// Device byte offset of the start of the set.
    pub offset: u64,
    pub set:    JournalSet,
}

/// A pattern hit that did not yield a usable set.
#[derive(Debug, Serialize)]
pub struct ScanFailure {
    /// Device byte offset the set would have started at.
    pub offset: u64,
    #[serde(serialize_with = "as_display")]
    pub error:  Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub chunks_read:   u64,
    /// Highest device offset read so far.
    pub bytes_scanned: u64,
    pub matches:       u64,
    pub yielded:       usize,
    pub failed:        u64,
}

/// Everything [`scan_all`] collected.
#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub sets:     Vec<Found>,
    pub failures: Vec<ScanFailure>,
    pub stats:    ScanStats,
}

impl ScanReport {
    pub fn summary(&self) -> String {
        format!(
            "{} journal set(s) recovered from {} match(es), {} rejected, {:.2} MiB scanned",
            self.sets.len(),
            self.stats.matches,
            self.stats.failed,
            self.stats.bytes_scanned as f64 / 1024.0 / 1024.0,
        )
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

pub type FailureFn<'a> = dyn FnMut(&ScanFailure) + 'a;

/// Lazy, single-pass search for journal sets.
///
/// Yields `Ok(Found)` per verified set.  A fatal I/O error is yielded once
/// as `Err`, after which the iterator is exhausted.
pub struct JournalScanner<'a, R: Read + Seek> {
    source:     &'a mut R,
    pattern:    Vec<u8>,
    opts:       ScanOptions,
    /// Reused for every chunk.
    buf:        Vec<u8>,
    next_chunk: u64,
    pending:    VecDeque<u64>,
    last_chunk: bool,
    done:       bool,
    stats:      ScanStats,
    failures:   Vec<ScanFailure>,
    on_failure: Option<Box<FailureFn<'a>>>,
}

impl<'a, R: Read + Seek> JournalScanner<'a, R> {
    pub fn new(source: &'a mut R, pattern: &[u8], opts: ScanOptions) -> Result<Self> {
        opts.validate(pattern)?;
        Ok(Self {
            source,
            pattern:    pattern.to_vec(),
            buf:        vec![0u8; opts.chunk_size],
            next_chunk: opts.start_offset,
            opts,
            pending:    VecDeque::new(),
            last_chunk: false,
            done:       false,
            stats:      ScanStats::default(),
            failures:   Vec::new(),
            on_failure: None,
        })
    }

    /// Call `f` for every recoverable failure as it happens.
    pub fn on_failure<F: FnMut(&ScanFailure) + 'a>(mut self, f: F) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn failures(&self) -> &[ScanFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<ScanFailure> {
        self.failures
    }

    /// Read the next chunk and queue every pattern hit in it.
    fn fill_chunk(&mut self) -> Result<()> {
        let chunk_start = self.next_chunk;
        self.source.seek(SeekFrom::Start(chunk_start))?;
        let n = read_full(&mut *self.source, &mut self.buf)?;

        self.stats.chunks_read += 1;
        self.stats.bytes_scanned = self.stats.bytes_scanned.max(chunk_start + n as u64);
        if n < self.buf.len() {
            self.last_chunk = true;
        }

        for i in find_all(&self.buf[..n], &self.pattern) {
            self.pending.push_back(chunk_start + i as u64);
        }
        debug!(chunk_start, len = n, hits = self.pending.len(), "scanned chunk");

        let overlap = self.pattern.len() - 1;
        self.next_chunk = chunk_start + (self.buf.len() - overlap) as u64;
        Ok(())
    }

    /// Try to decode a set around the hit at `hit`.  `Ok(None)` means the
    /// candidate was rejected and recorded.
    fn try_hit(&mut self, hit: u64) -> Result<Option<Found>> {
        self.stats.matches += 1;
        let Some(start) = hit.checked_sub(JSET_MAGIC_OFFSET) else {
            self.record(hit, Error::Truncated);
            return Ok(None);
        };

        self.source.seek(SeekFrom::Start(start))?;
        let window = (&mut *self.source).take(self.opts.max_set_bytes);
        let set = match JournalSet::decode(BufReader::new(window)) {
            Ok(set) => set,
            Err(e) if e.is_recoverable() => {
                self.record(start, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !magic_matches(set.magic, &self.pattern) {
            let expected = pattern_magic(&self.pattern);
            self.record(start, Error::BadSetMagic { expected, found: set.magic });
            return Ok(None);
        }

        info!(offset = start, seq = set.seq, keys = set.key_count, "recovered journal set");
        Ok(Some(Found { offset: start, set }))
    }

    fn record(&mut self, offset: u64, error: Error) {
        warn!(offset, %error, "rejected journal set candidate");
        self.stats.failed += 1;
        let failure = ScanFailure { offset, error };
        if let Some(cb) = self.on_failure.as_mut() {
            cb(&failure);
        }
        self.failures.push(failure);
    }
}

impl<R: Read + Seek> Iterator for JournalScanner<'_, R> {
    type Item = Result<Found>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.stats.yielded >= self.opts.max_results {
                return None;
            }
            if let Some(hit) = self.pending.pop_front() {
                match self.try_hit(hit) {
                    Ok(Some(found)) => {
                        self.stats.yielded += 1;
                        return Some(Ok(found));
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }
            if self.last_chunk {
                self.done = true;
                return None;
            }
            if let Err(e) = self.fill_chunk() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Scan `source` for up to `max_results` journal sets marked by `pattern`,
/// with default options otherwise.
pub fn scan<'a, R: Read + Seek>(
    source:      &'a mut R,
    pattern:     &[u8],
    max_results: usize,
) -> Result<JournalScanner<'a, R>> {
    let opts = ScanOptions { max_results, ..ScanOptions::default() };
    JournalScanner::new(source, pattern, opts)
}

/// Run a scan to completion and collect the results.
pub fn scan_all<R: Read + Seek>(
    source:  &mut R,
    pattern: &[u8],
    opts:    ScanOptions,
) -> Result<ScanReport> {
    let mut scanner = JournalScanner::new(source, pattern, opts)?;
    let mut sets = Vec::new();
    for found in scanner.by_ref() {
        sets.push(found?);
    }
    let stats = scanner.stats().clone();
    Ok(ScanReport { sets, failures: scanner.into_failures(), stats })
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Every index at which `needle` occurs in `haystack`, overlapping hits
/// included.
pub fn find_all<'h>(haystack: &'h [u8], needle: &'h [u8]) -> impl Iterator<Item = usize> + 'h {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, w)| *w == needle)
        .map(|(i, _)| i)
}

fn magic_matches(magic: u64, pattern: &[u8]) -> bool {
    let bytes = magic.to_le_bytes();
    let n = pattern.len().min(bytes.len());
    bytes[..n] == pattern[..n]
}

fn pattern_magic(pattern: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let n = pattern.len().min(8);
    bytes[..n].copy_from_slice(&pattern[..n]);
    u64::from_le_bytes(bytes)
}

fn as_display<S: Serializer>(e: &Error, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bkey::{Key, Ptr};
    use crate::layout::JSET_MAGIC;
    use std::io::Cursor;

    const MAGIC: u64 = JSET_MAGIC ^ 0x5555;

    fn device(len: usize, sets: &[(usize, &JournalSet)]) -> Cursor<Vec<u8>> {
        let mut buf = vec![0u8; len];
        for (at, set) in sets {
            let bytes = set.to_bytes();
            buf[*at..*at + bytes.len()].copy_from_slice(&bytes);
        }
        Cursor::new(buf)
    }

    fn small_chunks(chunk_size: usize) -> ScanOptions {
        ScanOptions { chunk_size, ..ScanOptions::default() }
    }

    fn set(seq: u64) -> JournalSet {
        JournalSet::new(MAGIC, seq, seq, vec![Key::extent(1, 64, 8, vec![Ptr(9)])])
    }

    #[test]
    fn find_all_reports_overlaps() {
        let hits: Vec<_> = find_all(b"aaaa", b"aa").collect();
        assert_eq!(hits, vec![0, 1, 2]);
        assert_eq!(find_all(b"ab", b"abc").count(), 0);
    }

    #[test]
    fn rejects_bad_options() {
        let mut dev = Cursor::new(vec![0u8; 16]);
        assert!(matches!(
            JournalScanner::new(&mut dev, &[1; 8], small_chunks(8)),
            Err(Error::InvalidOptions(_))
        ));
        assert!(matches!(
            JournalScanner::new(&mut dev, &[], ScanOptions::default()),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn pattern_straddling_a_chunk_boundary_found_once() {
        let pattern = [0xA5u8, 1, 2, 3, 4, 5, 6, 7];
        let chunk = 64usize;
        for at in [chunk - 7, chunk - 1, chunk - 4, chunk - 8, chunk] {
            let mut bytes = vec![0u8; chunk * 4];
            bytes[at..at + 8].copy_from_slice(&pattern);
            let mut dev = Cursor::new(bytes);
            let mut scanner = JournalScanner::new(&mut dev, &pattern, small_chunks(chunk)).unwrap();
            assert!(scanner.next().is_none());
            assert_eq!(scanner.stats().matches, 1, "pattern at {at}");
        }
    }

    #[test]
    fn finds_sets_across_chunks() {
        let a = set(10);
        let b = set(11);
        let mut dev = device(8192, &[(100, &a), (3000, &b)]);
        let found: Vec<_> = JournalScanner::new(&mut dev, &MAGIC.to_le_bytes(), small_chunks(512))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].offset, 100);
        assert_eq!(found[0].set, a);
        assert_eq!(found[1].offset, 3000);
        assert_eq!(found[1].set, b);
    }

    #[test]
    fn max_results_stops_early() {
        let mut dev = device(4096, &[(0, &set(1)), (1024, &set(2)), (2048, &set(3))]);
        let found: Vec<_> = scan(&mut dev, &MAGIC.to_le_bytes(), 2).unwrap().collect();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn hit_without_room_for_checksum_is_reported() {
        let mut bytes = vec![0u8; 256];
        bytes[3..11].copy_from_slice(&MAGIC.to_le_bytes());
        let mut dev = Cursor::new(bytes);
        let mut scanner = scan(&mut dev, &MAGIC.to_le_bytes(), 10).unwrap();
        assert!(scanner.next().is_none());
        assert_eq!(scanner.failures().len(), 1);
        assert!(matches!(scanner.failures()[0].error, Error::Truncated));
        assert_eq!(scanner.failures()[0].offset, 3);
    }

    #[test]
    fn set_cut_off_by_device_end_is_reported() {
        let s = set(5);
        let len = 600 + s.encoded_len() - 10;
        let mut bytes = vec![0u8; len];
        let encoded = s.to_bytes();
        bytes[600..].copy_from_slice(&encoded[..len - 600]);
        let mut dev = Cursor::new(bytes);
        let report = scan_all(&mut dev, &MAGIC.to_le_bytes(), small_chunks(256)).unwrap();
        assert!(report.sets.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, Error::Truncated));
    }

    #[test]
    fn decode_window_bounds_oversized_sets() {
        let s = set(5);
        let mut dev = device(4096, &[(0, &s)]);
        let opts = ScanOptions { max_set_bytes: 100, ..small_chunks(512) };
        let report = scan_all(&mut dev, &MAGIC.to_le_bytes(), opts).unwrap();
        assert!(report.sets.is_empty());
        assert!(matches!(report.failures[0].error, Error::Truncated));
    }

    #[test]
    fn failure_callback_sees_every_rejection() {
        let mut bad = set(1);
        bad.checksum ^= 1;
        let good = set(2);
        let mut dev = device(4096, &[(0, &bad), (2048, &good)]);
        let mut seen = Vec::new();
        let found: Vec<_> = JournalScanner::new(&mut dev, &MAGIC.to_le_bytes(), small_chunks(300))
            .unwrap()
            .on_failure(|f| seen.push(f.offset))
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(seen, vec![0]);
    }

    #[test]
    fn start_offset_skips_earlier_sets() {
        let mut dev = device(4096, &[(0, &set(1)), (2048, &set(2))]);
        let opts = ScanOptions { start_offset: 1024, ..small_chunks(512) };
        let report = scan_all(&mut dev, &MAGIC.to_le_bytes(), opts).unwrap();
        assert_eq!(report.sets.len(), 1);
        assert_eq!(report.sets[0].set.seq, 2);
    }

    struct FailingSource {
        inner: Cursor<Vec<u8>>,
        fail_after: u64,
    }

    impl Read for FailingSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inner.position() >= self.fail_after {
                return Err(io::Error::new(io::ErrorKind::Other, "medium error"));
            }
            self.inner.read(buf)
        }
    }

    impl Seek for FailingSource {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn io_error_ends_the_scan() {
        let dev = device(4096, &[(0, &set(1))]);
        let mut src = FailingSource { inner: dev, fail_after: 1024 };
        let mut scanner = JournalScanner::new(&mut src, &MAGIC.to_le_bytes(), small_chunks(512)).unwrap();
        assert!(matches!(scanner.next(), Some(Ok(_))));
        assert!(matches!(scanner.next(), Some(Err(Error::Io(_)))));
        assert!(scanner.next().is_none());
    }
}
