//! LFU Policy Module
//!
//! Evicts the key with the fewest read hits. Ties go to the key inserted
//! first, so the order is total and eviction is deterministic.

use std::collections::{BTreeMap, HashMap};

use super::EvictionPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    hits: u64,
    inserted: u64,
}

#[derive(Debug, Default)]
pub struct LfuPolicy {
    ranks: HashMap<String, Rank>,
    by_rank: BTreeMap<Rank, String>,
    next_insert: u64,
}

impl LfuPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read hits recorded for a key.
    pub fn frequency(&self, key: &str) -> Option<u64> {
        self.ranks.get(key).map(|rank| rank.hits)
    }
}

impl EvictionPolicy for LfuPolicy {
    fn name(&self) -> &'static str {
        "lfu"
    }

    fn on_insert(&mut self, key: &str) {
        if self.ranks.contains_key(key) {
            return;
        }
        let rank = Rank {
            hits: 0,
            inserted: self.next_insert,
        };
        self.next_insert += 1;
        self.ranks.insert(key.to_string(), rank);
        self.by_rank.insert(rank, key.to_string());
    }

    // An overwrite is a write, not a use
    fn on_update(&mut self, _key: &str) {}

    fn on_access(&mut self, key: &str) {
        if let Some(rank) = self.ranks.get_mut(key) {
            if let Some(owned) = self.by_rank.remove(rank) {
                rank.hits = rank.hits.saturating_add(1);
                self.by_rank.insert(*rank, owned);
            }
        }
    }

    fn on_remove(&mut self, key: &str) {
        if let Some(rank) = self.ranks.remove(key) {
            self.by_rank.remove(&rank);
        }
    }

    fn victim(&mut self) -> Option<String> {
        self.by_rank.values().next().cloned()
    }

    fn clear(&mut self) {
        self.ranks.clear();
        self.by_rank.clear();
    }

    fn len(&self) -> usize {
        self.ranks.len()
    }
}
