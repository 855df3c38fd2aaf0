//! Round-scoped message pools.
//!
//! A [`Pool`] holds at most one item per (sequence number, sender). Each
//! sender may occupy at most `capacity` slots across all sequence numbers,
//! so a Byzantine oracle cannot grow the pool without bound by spamming
//! future rounds. Signature checks are deferred: entries carry a
//! `verified` flag that stays `None` until someone needs the entry.

use std::collections::{BTreeMap, HashMap};

use ocr3_types::{OracleId, SeqNr};

/// Why an item was not pooled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The sender already has an item at this sequence number
    #[error("already in pool")]
    AlreadyInPool,

    /// The sender used up its slots
    #[error("sender's pool slots are full")]
    Full,

    /// The sequence number was already delivered and reaped
    #[error("sequence number already delivered")]
    Stale,
}

/// An item and the cached result of verifying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry<T> {
    /// The pooled item
    pub item: T,
    /// `None` until verified, then whether verification succeeded
    pub verified: Option<bool>,
}

/// Per-sequence-number, per-sender message pool.
#[derive(Debug, Clone)]
pub struct Pool<T> {
    capacity: usize,
    entries: BTreeMap<SeqNr, BTreeMap<OracleId, PoolEntry<T>>>,
    counts: HashMap<OracleId, usize>,
    reaped_up_to: SeqNr,
}

impl<T> Pool<T> {
    /// Create an empty pool granting each sender `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
            counts: HashMap::new(),
            reaped_up_to: 0,
        }
    }

    /// Pool `item` from `sender` at `seq_nr`.
    pub fn put(&mut self, seq_nr: SeqNr, sender: OracleId, item: T) -> Result<(), PoolError> {
        if seq_nr <= self.reaped_up_to && self.reaped_up_to > 0 {
            return Err(PoolError::Stale);
        }
        if self
            .entries
            .get(&seq_nr)
            .is_some_and(|round| round.contains_key(&sender))
        {
            return Err(PoolError::AlreadyInPool);
        }
        let count = self.counts.entry(sender).or_insert(0);
        if *count >= self.capacity {
            return Err(PoolError::Full);
        }
        *count += 1;
        self.entries
            .entry(seq_nr)
            .or_default()
            .insert(sender, PoolEntry { item, verified: None });
        Ok(())
    }

    /// All entries at `seq_nr`, keyed by sender.
    pub fn entries(&self, seq_nr: SeqNr) -> Option<&BTreeMap<OracleId, PoolEntry<T>>> {
        self.entries.get(&seq_nr)
    }

    /// Mutable access to the entries at `seq_nr`, for lazy verification.
    pub fn entries_mut(&mut self, seq_nr: SeqNr) -> Option<&mut BTreeMap<OracleId, PoolEntry<T>>> {
        self.entries.get_mut(&seq_nr)
    }

    /// The entry of `sender` at `seq_nr`.
    pub fn entry(&self, seq_nr: SeqNr, sender: OracleId) -> Option<&PoolEntry<T>> {
        self.entries.get(&seq_nr).and_then(|round| round.get(&sender))
    }

    /// Number of entries at `seq_nr`.
    pub fn count(&self, seq_nr: SeqNr) -> usize {
        self.entries.get(&seq_nr).map_or(0, BTreeMap::len)
    }

    /// Drop every entry at or below `delivered_seq_nr`, freeing the senders'
    /// slots.
    pub fn reap_delivered(&mut self, delivered_seq_nr: SeqNr) {
        let keep = self.entries.split_off(&(delivered_seq_nr + 1));
        let reaped = std::mem::replace(&mut self.entries, keep);
        for round in reaped.into_values() {
            for sender in round.into_keys() {
                if let Some(count) = self.counts.get_mut(&sender) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        self.reaped_up_to = self.reaped_up_to.max(delivered_seq_nr);
    }

    /// Total number of pooled items.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// Whether the pool holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_entries() {
        let mut pool = Pool::new(10);
        pool.put(1, 0, "a").unwrap();
        pool.put(1, 2, "b").unwrap();
        pool.put(2, 0, "c").unwrap();

        assert_eq!(pool.count(1), 2);
        assert_eq!(pool.entry(1, 2).unwrap().item, "b");
        assert_eq!(pool.entry(1, 2).unwrap().verified, None);
        assert!(pool.entries(3).is_none());
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut pool = Pool::new(10);
        pool.put(1, 0, "a").unwrap();
        assert_eq!(pool.put(1, 0, "b"), Err(PoolError::AlreadyInPool));
        assert_eq!(pool.entry(1, 0).unwrap().item, "a");
    }

    #[test]
    fn test_per_sender_capacity() {
        let mut pool = Pool::new(2);
        pool.put(1, 0, ()).unwrap();
        pool.put(2, 0, ()).unwrap();
        assert_eq!(pool.put(3, 0, ()), Err(PoolError::Full));
        // other senders are unaffected
        pool.put(3, 1, ()).unwrap();
    }

    #[test]
    fn test_reap_frees_slots() {
        let mut pool = Pool::new(2);
        pool.put(1, 0, ()).unwrap();
        pool.put(2, 0, ()).unwrap();
        pool.reap_delivered(1);
        assert!(pool.entries(1).is_none());
        assert_eq!(pool.count(2), 1);
        pool.put(3, 0, ()).unwrap();
    }

    #[test]
    fn test_reaped_seq_nr_is_stale() {
        let mut pool = Pool::new(10);
        pool.reap_delivered(5);
        assert_eq!(pool.put(5, 0, ()), Err(PoolError::Stale));
        assert_eq!(pool.put(4, 0, ()), Err(PoolError::Stale));
        pool.put(6, 0, ()).unwrap();
    }
}
