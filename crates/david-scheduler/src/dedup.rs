//! Dedup cache for on-chain events.
//!
//! Redundant providers deliver the same log more than once. The cache keeps,
//! per block number, the fingerprints already accepted and suppresses repeats.
//! Only the most recent [`DEDUP_BLOCK_WINDOW`] block numbers are retained; the
//! lowest-numbered bucket is evicted first, so a repeat of an evicted block's
//! log is accepted again.

use std::collections::{BTreeMap, HashSet};

use uuid::Uuid;

use crate::provider::LogEntry;

/// Number of block buckets retained.
pub const DEDUP_BLOCK_WINDOW: usize = 5;

/// Fingerprint of one occurrence within one registration:
/// correlation id + transaction hash + log position.
pub fn fingerprint(correlation: Uuid, entry: &LogEntry) -> String {
    format!(
        "{correlation}:{}:{}",
        entry.transaction_hash.to_lowercase(),
        entry.log_index
    )
}

/// Bounded block → fingerprints record.
#[derive(Debug)]
pub struct DedupCache {
    buckets: BTreeMap<u64, HashSet<String>>,
    window: usize,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_window(DEDUP_BLOCK_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            buckets: BTreeMap::new(),
            window: window.max(1),
        }
    }

    /// Record a sighting. Returns `true` on first sighting, `false` for a repeat.
    pub fn observe(&mut self, block_number: u64, fingerprint: String) -> bool {
        if !self.buckets.entry(block_number).or_default().insert(fingerprint) {
            return false;
        }
        while self.buckets.len() > self.window {
            if let Some((evicted, _)) = self.buckets.pop_first() {
                tracing::trace!("🧹 Dedup evicted block {evicted}");
            }
        }
        true
    }

    pub fn contains(&self, block_number: u64, fingerprint: &str) -> bool {
        self.buckets
            .get(&block_number)
            .is_some_and(|bucket| bucket.contains(fingerprint))
    }

    /// Number of block buckets currently retained.
    pub fn block_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn fingerprint_count(&self) -> usize {
        self.buckets.values().map(HashSet::len).sum()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(block: u64, tx: &str, index: u64) -> LogEntry {
        LogEntry {
            address: "0xabc".into(),
            event_name: "Deposit".into(),
            block_number: block,
            transaction_hash: tx.into(),
            log_index: index,
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_repeat_is_suppressed() {
        let correlation = Uuid::new_v4();
        let mut cache = DedupCache::new();
        let entry = log(100, "0xAA", 0);

        assert!(cache.observe(100, fingerprint(correlation, &entry)));
        assert!(!cache.observe(100, fingerprint(correlation, &entry)));
        assert!(!cache.observe(100, fingerprint(correlation, &entry)));
        assert_eq!(cache.fingerprint_count(), 1);
    }

    #[test]
    fn test_distinct_logs_in_same_block() {
        let correlation = Uuid::new_v4();
        let mut cache = DedupCache::new();

        assert!(cache.observe(100, fingerprint(correlation, &log(100, "0xaa", 0))));
        assert!(cache.observe(100, fingerprint(correlation, &log(100, "0xaa", 1))));
        assert!(cache.observe(100, fingerprint(correlation, &log(100, "0xbb", 0))));
        assert_eq!(cache.block_count(), 1);
        assert_eq!(cache.fingerprint_count(), 3);
    }

    #[test]
    fn test_correlation_separates_registrations() {
        let entry = log(7, "0xaa", 0);
        let mut cache = DedupCache::new();
        assert!(cache.observe(7, fingerprint(Uuid::new_v4(), &entry)));
        assert!(cache.observe(7, fingerprint(Uuid::new_v4(), &entry)));
    }

    #[test]
    fn test_hash_case_is_normalized() {
        let correlation = Uuid::new_v4();
        assert_eq!(
            fingerprint(correlation, &log(1, "0xABCD", 3)),
            fingerprint(correlation, &log(1, "0xabcd", 3))
        );
    }

    #[test]
    fn test_oldest_block_evicted_after_six_blocks() {
        let correlation = Uuid::new_v4();
        let mut cache = DedupCache::new();
        let first = fingerprint(correlation, &log(1, "0x01", 0));

        assert!(cache.observe(1, first.clone()));
        for block in 2..=6 {
            let fp = fingerprint(correlation, &log(block, &format!("0x{block:02}"), 0));
            assert!(cache.observe(block, fp));
        }

        assert_eq!(cache.block_count(), DEDUP_BLOCK_WINDOW);
        assert!(!cache.contains(1, &first));
        // Known limitation: a late repeat of an evicted block looks new.
        assert!(cache.observe(1, first));
    }

    #[test]
    fn test_memory_is_bounded() {
        let correlation = Uuid::new_v4();
        let mut cache = DedupCache::new();
        for block in 0..1_000u64 {
            for index in 0..3 {
                cache.observe(block, fingerprint(correlation, &log(block, "0xaa", index)));
            }
        }
        assert_eq!(cache.block_count(), DEDUP_BLOCK_WINDOW);
        assert_eq!(cache.fingerprint_count(), DEDUP_BLOCK_WINDOW * 3);
    }
}
