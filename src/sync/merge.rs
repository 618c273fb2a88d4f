//! Last-write-wins merge

use crate::cache::{CacheEntry, EntryMap};
use std::cmp::Ordering;

/// Counts from one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Incoming entries that replaced or added local state
    pub applied: usize,
    /// Incoming entries that lost to local state
    pub ignored: usize,
    /// Keys whose stored entry changed
    pub changed_keys: Vec<String>,
}

/// Total order on two versions of the same key.
///
/// Newer `last_modified` wins. Equal stamps fall back to a content
/// comparison so every device picks the same winner regardless of the
/// order entries arrive in: tombstones beat live values, then the larger
/// canonical JSON wins.
pub fn compare(a: &CacheEntry, b: &CacheEntry) -> Ordering {
    a.last_modified
        .cmp(&b.last_modified)
        .then_with(|| a.deleted.cmp(&b.deleted))
        .then_with(|| canonical(a).cmp(&canonical(b)))
}

// serde_json maps are sorted, so this is stable across devices
fn canonical(entry: &CacheEntry) -> String {
    serde_json::to_string(&entry.value).unwrap_or_default()
}

/// Merge `incoming` into `local`, keeping the winner per key
pub fn merge_into(local: &mut EntryMap, incoming: impl IntoIterator<Item = CacheEntry>) -> MergeStats {
    let mut stats = MergeStats::default();

    for entry in incoming {
        let wins = match local.get(&entry.key) {
            Some(current) => compare(&entry, current) == Ordering::Greater,
            None => true,
        };

        if wins {
            stats.applied += 1;
            stats.changed_keys.push(entry.key.clone());
            local.insert(entry.key.clone(), entry);
        } else {
            stats.ignored += 1;
        }
    }

    stats
}
