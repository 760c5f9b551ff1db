//! Bounded duplicate suppression.
use crate::sample::{RawSample, SignalId};
use std::collections::HashSet;

/// Default number of keys remembered before the set resets.
pub const DEFAULT_DEDUP_CAPACITY: usize = 100_000;

/// Fingerprint of `(signal, time, value)`. Values compare by bit pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey {
    signal_id: SignalId,
    time: i64,
    value_bits: u64,
}

impl DedupKey {
    /// Builds the key for one reading.
    pub fn new(signal_id: SignalId, time: i64, value: f64) -> Self {
        // -0.0 and 0.0 are the same reading
        let value = if value == 0.0 { 0.0 } else { value };
        Self {
            signal_id,
            time,
            value_bits: value.to_bits(),
        }
    }
}

/// Set of recently seen keys, never larger than its capacity.
///
/// Inserting a new key into a full set clears the whole set first. Duplicates of keys
/// seen before the reset are no longer detected.
#[derive(Debug)]
pub struct RecentKeySet {
    keys: HashSet<DedupKey>,
    capacity: usize,
    resets: u64,
}

impl Default for RecentKeySet {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl RecentKeySet {
    /// Empty set holding at most `capacity` keys (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            keys: HashSet::with_capacity(capacity.min(DEFAULT_DEDUP_CAPACITY)),
            capacity,
            resets: 0,
        }
    }

    /// Records `key`. Returns `false` if it was already present.
    pub fn insert(&mut self, key: DedupKey) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        if self.keys.len() >= self.capacity {
            self.keys.clear();
            self.resets += 1;
            tracing::debug!(capacity = self.capacity, "Dedup key set full, resetting");
        }
        self.keys.insert(key)
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key is held.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Maximum number of keys held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many times the set has been cleared because it was full.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Keeps the first occurrence of each key and drops unstamped samples.
    ///
    /// Returns `(signal, time, value)` triples in input order.
    pub fn filter_batch(&mut self, batch: Vec<RawSample>) -> Vec<(SignalId, i64, f64)> {
        batch
            .into_iter()
            .filter_map(|sample| {
                let time = sample.time?;
                let key = DedupKey::new(sample.signal_id.clone(), time, sample.value);
                self.insert(key)
                    .then_some((sample.signal_id, time, sample.value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: i64) -> DedupKey {
        DedupKey::new(SignalId::new("s"), n, 1.0)
    }

    #[test]
    fn duplicate_is_rejected() {
        let mut set = RecentKeySet::new(10);
        assert!(set.insert(key(1)));
        assert!(!set.insert(key(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn full_set_resets_before_next_new_key() {
        let mut set = RecentKeySet::new(3);
        for n in 0..3 {
            assert!(set.insert(key(n)));
        }
        assert_eq!(set.len(), 3);

        assert!(set.insert(key(3)));
        assert_eq!(set.len(), 1);
        assert_eq!(set.resets(), 1);
        assert!(set.insert(key(0)), "key from before the reset is forgotten");
    }

    #[test]
    fn filter_drops_unstamped_and_duplicates() {
        let mut set = RecentKeySet::default();
        let batch = vec![
            RawSample::new("a", 10, 1.0),
            RawSample::new("a", 10, 1.0),
            RawSample::unstamped("a", 1.0),
            RawSample::new("a", 10, 2.0),
        ];

        let kept = set.filter_batch(batch);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].2, 2.0);
    }

    #[test]
    fn signed_zero_is_one_key() {
        assert_eq!(
            DedupKey::new(SignalId::new("z"), 0, 0.0),
            DedupKey::new(SignalId::new("z"), 0, -0.0)
        );
    }
}
