//! FIFO eviction: strictly by first insertion, reads never reorder.

use super::ordered::OrderedKeys;
use super::EvictionPolicy;

#[derive(Debug, Default)]
pub struct FifoPolicy {
    order: OrderedKeys,
}

impl FifoPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionPolicy for FifoPolicy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn on_insert(&mut self, key: &str) {
        self.order.insert(key);
    }

    // Overwrites keep their original queue position
    fn on_update(&mut self, _key: &str) {}

    fn on_access(&mut self, _key: &str) {}

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
