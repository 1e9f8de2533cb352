//! LRU Policy Module
//!
//! Implements Least Recently Used tracking for cache eviction.

use super::ordered::OrderedKeys;
use super::EvictionPolicy;

// == LRU Policy ==
/// Evicts the key whose last write or read hit is the oldest.
#[derive(Debug, Default)]
pub struct LruPolicy {
    /// Keys by access time, oldest first
    order: OrderedKeys,
}

impl LruPolicy {
    pub fn new() -> Self {
        Self {
            order: OrderedKeys::new(),
        }
    }

    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<&String> {
        self.order.oldest()
    }

    fn touch_tracked(&mut self, key: &str) {
        if self.order.contains(key) {
            self.order.touch(key);
        }
    }
}

impl EvictionPolicy for LruPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn on_insert(&mut self, key: &str) {
        self.order.touch(key);
    }

    fn on_update(&mut self, key: &str) {
        self.order.touch(key);
    }

    fn on_access(&mut self, key: &str) {
        self.touch_tracked(key);
    }

    fn on_remove(&mut self, key: &str) {
        self.order.remove(key);
    }

    fn victim(&mut self) -> Option<String> {
        self.order.oldest().cloned()
    }

    fn clear(&mut self) {
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}
