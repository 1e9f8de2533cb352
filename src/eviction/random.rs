//! Random eviction policy
//!
//! Selects victims uniformly at random among tracked keys. The random source
//! is owned by the policy, so tests can inject a seeded generator and get a
//! reproducible eviction sequence.

use std::fmt;

use indexmap::IndexSet;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use super::EvictionPolicy;

pub struct RandomPolicy {
    keys: IndexSet<String>,
    rng: Box<dyn RngCore + Send>,
}

impl RandomPolicy {
    /// Policy backed by an OS-seeded generator.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Policy with a fixed seed for reproducible behavior.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            keys: IndexSet::new(),
            rng: Box::new(rng),
        }
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RandomPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomPolicy")
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl EvictionPolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn on_insert(&mut self, key: &str) {
        if !self.keys.contains(key) {
            self.keys.insert(key.to_string());
        }
    }

    fn on_update(&mut self, _key: &str) {}

    fn on_access(&mut self, _key: &str) {}

    fn on_remove(&mut self, key: &str) {
        self.keys.swap_remove(key);
    }

    fn victim(&mut self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..self.keys.len());
        self.keys.get_index(index).cloned()
    }

    fn clear(&mut self) {
        self.keys.clear();
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}
