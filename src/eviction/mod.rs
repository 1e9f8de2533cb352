//! Eviction Module
//!
//! Strategies that pick which key gives way when a cache is full. Policies
//! only track keys; they never hold values and never remove entries on their
//! own. The manager reports every insert, overwrite, read hit and removal,
//! then asks for a victim when it needs room.

mod fifo;
mod lfu;
mod lru;
mod ordered;
mod random;

pub use fifo::FifoPolicy;
pub use lfu::LfuPolicy;
pub use lru::LruPolicy;
pub use random::RandomPolicy;

use crate::config::EvictionStrategy;

// == Eviction Policy ==
/// Bookkeeping contract shared by every eviction strategy.
pub trait EvictionPolicy: Send {
    /// Short policy name, e.g. "lru"
    fn name(&self) -> &'static str;

    /// A brand-new key was stored.
    fn on_insert(&mut self, key: &str);

    /// An existing key was overwritten.
    fn on_update(&mut self, key: &str);

    /// A live key was read (`get` or `has` hit).
    fn on_access(&mut self, key: &str);

    /// A key left the cache for any reason.
    fn on_remove(&mut self, key: &str);

    /// The key that should be evicted next, without forgetting it.
    ///
    /// The manager calls [`on_remove`](Self::on_remove) once the victim is
    /// actually gone.
    fn victim(&mut self) -> Option<String>;

    /// Forgets every key.
    fn clear(&mut self);

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the default policy for a configured strategy.
pub fn policy_for(strategy: EvictionStrategy) -> Box<dyn EvictionPolicy> {
    match strategy {
        EvictionStrategy::Lru => Box::new(LruPolicy::new()),
        EvictionStrategy::Lfu => Box::new(LfuPolicy::new()),
        EvictionStrategy::Fifo => Box::new(FifoPolicy::new()),
        EvictionStrategy::Random => Box::new(RandomPolicy::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_names() {
        assert_eq!(policy_for(EvictionStrategy::Lru).name(), "lru");
        assert_eq!(policy_for(EvictionStrategy::Lfu).name(), "lfu");
        assert_eq!(policy_for(EvictionStrategy::Fifo).name(), "fifo");
        assert_eq!(policy_for(EvictionStrategy::Random).name(), "random");
    }

    #[test]
    fn test_every_policy_forgets_removed_keys() {
        for strategy in [
            EvictionStrategy::Lru,
            EvictionStrategy::Lfu,
            EvictionStrategy::Fifo,
            EvictionStrategy::Random,
        ] {
            let mut policy = policy_for(strategy);
            policy.on_insert("a");
            policy.on_insert("b");
            policy.on_access("a");
            policy.on_remove("a");

            assert_eq!(policy.len(), 1, "{}", strategy);
            assert_eq!(policy.victim(), Some("b".to_string()), "{}", strategy);

            policy.clear();
            assert!(policy.is_empty(), "{}", strategy);
            assert_eq!(policy.victim(), None, "{}", strategy);
        }
    }
}
