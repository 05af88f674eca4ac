use bcache_rescue::layout::{JSET_MAGIC, SB_START};
use bcache_rescue::recovery::{live_entries, scan, scan_all, ScanOptions};
use bcache_rescue::{Error, JournalSet, Key, Ptr, Superblock};
use std::fs::File;
use std::io::{Cursor, Write};
use tempfile::NamedTempFile;
use uuid::Uuid;

const SET_MAGIC: u64 = 0x6b1d_93f0_2c44_a7e5;
const DEVICE_SIZE: usize = 256 * 1024;

fn superblock() -> Superblock {
    let mut sb = Superblock::new(Uuid::from_bytes([0x42; 16]), SET_MAGIC);
    sb.label[..4].copy_from_slice(b"ssd0");
    sb.nbuckets = 512;
    sb.nr_journal_buckets = 2;
    sb.journal_bucket_slots[0] = 64;
    sb.journal_bucket_slots[1] = 65;
    sb.seal();
    sb
}

fn journal_set(seq: u64) -> JournalSet {
    JournalSet::new(
        JSET_MAGIC ^ SET_MAGIC,
        seq,
        seq - 1,
        vec![
            Key::extent(7, 2048, 8, Vec::new()),
            Key::extent(7, 2056, 8, vec![Ptr::new(0, 131_072, 4)]),
        ],
    )
}

fn image(sets: &[(usize, &JournalSet)]) -> Vec<u8> {
    let mut dev = vec![0u8; DEVICE_SIZE];
    let sb = superblock().to_bytes();
    let at = SB_START as usize;
    dev[at..at + sb.len()].copy_from_slice(&sb);
    for (at, set) in sets {
        let bytes = set.to_bytes();
        dev[*at..*at + bytes.len()].copy_from_slice(&bytes);
    }
    dev
}

#[test]
fn test_end_to_end_single_set() {
    let set = journal_set(41);
    let mut dev = Cursor::new(image(&[(65536, &set)]));

    let sb = Superblock::decode(&mut dev).unwrap();
    assert_eq!(sb, superblock());
    assert_eq!(sb.label_str(), "ssd0");
    assert_eq!(sb.journal_buckets(), &[64, 65]);

    let pattern = sb.journal_pattern();
    let mut scanner = scan(&mut dev, &pattern, 1).unwrap();

    let found = scanner.next().unwrap().unwrap();
    assert_eq!(found.offset, 65536);
    assert_eq!(found.set.seq, 41);
    assert_eq!(found.set.key_count, 2);
    assert_eq!(found.set.keys.len(), 2);
    assert_eq!(found.set.keys[0].ptr_count(), 0);
    assert_eq!(found.set.keys[1].ptr_count(), 1);
    assert_eq!(found.set.keys[1].ptrs[0].offset(), 131_072);
    assert_eq!(found.set, set);

    assert!(scanner.next().is_none());
    assert!(scanner.failures().is_empty());
}

#[test]
fn test_exhausting_the_device_yields_nothing_more() {
    let set = journal_set(41);
    let mut dev = Cursor::new(image(&[(65536, &set)]));
    let pattern = Superblock::decode(&mut dev).unwrap().journal_pattern();

    let opts = ScanOptions { chunk_size: 4096, ..ScanOptions::default() };
    let report = scan_all(&mut dev, &pattern, opts).unwrap();
    assert_eq!(report.sets.len(), 1);
    assert!(report.failures.is_empty());
    assert_eq!(report.stats.matches, 1);
    assert_eq!(report.stats.bytes_scanned, DEVICE_SIZE as u64);
}

#[test]
fn test_corrupt_set_is_skipped_not_fatal() {
    let bad = journal_set(41);
    let good = journal_set(42);
    let mut bytes = image(&[(65536, &bad), (131_072, &good)]);
    // Flip a bit in the second key's pointer word.
    bytes[65536 + 240 + 16 + 16] ^= 0x10;
    let mut dev = Cursor::new(bytes);
    let pattern = Superblock::decode(&mut dev).unwrap().journal_pattern();

    let opts = ScanOptions { chunk_size: 8192, ..ScanOptions::default() };
    let report = scan_all(&mut dev, &pattern, opts).unwrap();

    assert_eq!(report.sets.len(), 1);
    assert_eq!(report.sets[0].offset, 131_072);
    assert_eq!(report.sets[0].set.seq, 42);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].offset, 65536);
    assert!(matches!(report.failures[0].error, Error::BadChecksum { .. }));
    assert!(report.summary().starts_with("1 journal set(s)"));
}

#[test]
fn test_set_split_across_chunks() {
    let set = journal_set(9);
    // Magic field lands on the boundary between the first two 64 KiB chunks.
    let at = 65536 - 12;
    let mut dev = Cursor::new(image(&[(at, &set)]));
    let pattern = superblock().journal_pattern();

    let opts = ScanOptions { chunk_size: 65536, ..ScanOptions::default() };
    let report = scan_all(&mut dev, &pattern, opts).unwrap();
    assert_eq!(report.sets.len(), 1);
    assert_eq!(report.sets[0].offset, at as u64);
    assert_eq!(report.stats.matches, 1);
}

#[test]
fn test_scan_file_backed_device() {
    let mut tmp = NamedTempFile::new().unwrap();
    let sets = [journal_set(10), journal_set(11), journal_set(12)];
    tmp.write_all(&image(&[(32768, &sets[2]), (65536, &sets[0]), (98304, &sets[1])])).unwrap();
    tmp.flush().unwrap();

    let mut file = File::open(tmp.path()).unwrap();
    let sb = Superblock::decode(&mut file).unwrap();
    let report = scan_all(&mut file, &sb.journal_pattern(), ScanOptions::default()).unwrap();
    assert_eq!(report.sets.len(), 3);

    let live = live_entries(report.sets.into_iter().map(|f| f.set).collect());
    let seqs: Vec<u64> = live.iter().map(|s| s.seq).collect();
    assert_eq!(seqs, vec![11, 12]);
}

#[test]
fn test_damaged_superblock_still_readable_raw() {
    let mut bytes = image(&[]);
    // Corrupt the label: checksum no longer matches.
    bytes[SB_START as usize + 72] = b'X';
    let mut dev = Cursor::new(bytes);

    assert!(matches!(Superblock::decode(&mut dev), Err(Error::BadChecksum { .. })));
    let raw = Superblock::read_raw(&mut dev).unwrap();
    assert_eq!(raw.label_str(), "Xsd0");
    assert_eq!(raw.jset_magic(), JSET_MAGIC ^ SET_MAGIC);
}

#[test]
fn test_empty_device() {
    let mut dev = Cursor::new(Vec::new());
    assert!(matches!(Superblock::decode(&mut dev), Err(Error::Truncated)));
    let report = scan_all(&mut dev, &[1, 2, 3, 4, 5, 6, 7, 8], ScanOptions::default()).unwrap();
    assert!(report.sets.is_empty());
    assert_eq!(report.stats.chunks_read, 1);
}
