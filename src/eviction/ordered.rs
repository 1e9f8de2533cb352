//! Ordered key list used by the recency and insertion-order policies.

use std::collections::{BTreeMap, HashMap};

/// Keys ordered by a monotonically increasing stamp.
///
/// Oldest = smallest stamp, newest = largest. Moving a key to the newest end
/// and popping the oldest are both O(log n).
#[derive(Debug, Default)]
pub(crate) struct OrderedKeys {
    stamps: HashMap<String, u64>,
    order: BTreeMap<u64, String>,
    next: u64,
}

impl OrderedKeys {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Moves a key to the newest end, adding it if absent.
    pub(crate) fn touch(&mut self, key: &str) {
        let stamp = self.next;
        self.next += 1;
        match self.stamps.get_mut(key) {
            Some(old) => {
                if let Some(owned) = self.order.remove(old) {
                    self.order.insert(stamp, owned);
                }
                *old = stamp;
            }
            None => {
                self.stamps.insert(key.to_string(), stamp);
                self.order.insert(stamp, key.to_string());
            }
        }
    }

    /// Adds a key at the newest end unless already tracked.
    pub(crate) fn insert(&mut self, key: &str) {
        if !self.stamps.contains_key(key) {
            self.touch(key);
        }
    }

    pub(crate) fn remove(&mut self, key: &str) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
    }

    pub(crate) fn oldest(&self) -> Option<&String> {
        self.order.values().next()
    }

    pub(crate) fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.stamps.len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.stamps.contains_key(key)
    }

    /// Keys from oldest to newest.
    #[cfg(test)]
    pub(crate) fn iter_oldest_first(&self) -> impl Iterator<Item = &String> {
        self.order.values()
    }
}
