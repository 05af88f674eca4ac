//! Ordering recovered journal sets for replay.

use crate::bkey::Key;
use crate::jset::JournalSet;

/// Sets that belong to the live journal, in replay order.
///
/// Every set records the oldest sequence number still needed (`last_seq`).
/// The newest such value across all sets bounds the live journal; older sets
/// were already written back and are dropped.  Copies of the same sequence
/// number keep the first one seen.
pub fn live_entries(sets: Vec<JournalSet>) -> Vec<JournalSet> {
    let Some(oldest_needed) = sets.iter().map(|s| s.last_seq).max() else {
        return Vec::new();
    };
    let mut live: Vec<JournalSet> = sets.into_iter().filter(|s| s.seq >= oldest_needed).collect();
    live.sort_by_key(|s| s.seq);
    live.dedup_by_key(|s| s.seq);
    live
}

/// Keys of `sets` flattened in order.
pub fn replay_keys(sets: &[JournalSet]) -> impl Iterator<Item = &Key> {
    sets.iter().flat_map(|s| s.keys.iter())
}
