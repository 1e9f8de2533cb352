//! Memory Store Module
//!
//! HashMap-backed store with lazy TTL expiration. Capacity and eviction are
//! left to the manager; the store itself is unbounded.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::{CacheEntry, CacheEvent, EventEmitter};
use crate::error::Result;
use crate::store::{CacheStore, CacheValue, StoreStats};

// == Memory Store ==
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Key-value storage
    entries: RwLock<HashMap<String, CacheEntry<CacheValue>>>,
    /// Performance statistics, size is filled in on read
    stats: Mutex<StoreStats>,
    events: EventEmitter,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // == Purge Expired ==
    /// Removes all expired entries.
    ///
    /// Returns the number of entries removed.
    pub async fn purge_expired(&self) -> usize {
        let expired_keys: Vec<String> = {
            let mut entries = self.entries.write().await;
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired())
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };

        for key in &expired_keys {
            self.events.emit(&CacheEvent::Expire { key: key.clone() });
        }
        if !expired_keys.is_empty() {
            debug!(count = expired_keys.len(), "memory store purged expired entries");
        }
        expired_keys.len()
    }

    /// Drops `key` if it is present but expired. Returns true if it was dropped.
    async fn drop_if_expired(&self, key: &str) -> bool {
        let dropped = {
            let mut entries = self.entries.write().await;
            match entries.get(key) {
                Some(entry) if entry.is_expired() => {
                    entries.remove(key);
                    true
                }
                _ => false,
            }
        };
        if dropped {
            self.events.emit(&CacheEvent::Expire {
                key: key.to_string(),
            });
        }
        dropped
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    // == Get ==
    /// Returns the value if found and not expired.
    /// Expired entries are removed and counted as misses.
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.drop_if_expired(key).await;

        let value = self
            .entries
            .read()
            .await
            .get(key)
            .map(|entry| entry.value.clone());

        match value {
            Some(value) => {
                self.stats.lock().hits += 1;
                self.events.emit(&CacheEvent::Hit {
                    key: key.to_string(),
                });
                Ok(Some(value))
            }
            None => {
                self.stats.lock().misses += 1;
                self.events.emit(&CacheEvent::Miss {
                    key: key.to_string(),
                });
                Ok(None)
            }
        }
    }

    // == Set ==
    /// Stores a key-value pair; an existing key is overwritten and its TTL reset.
    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(value.clone(), ttl);
        self.entries.write().await.insert(key.to_string(), entry);
        self.stats.lock().sets += 1;
        self.events.emit(&CacheEvent::Set {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        self.drop_if_expired(key).await;
        Ok(self.entries.read().await.contains_key(key))
    }

    // == Delete ==
    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.entries.write().await.remove(key);
        match removed {
            Some(entry) if entry.is_live() => {
                self.stats.lock().deletes += 1;
                self.events.emit(&CacheEvent::Delete {
                    key: key.to_string(),
                });
                Ok(true)
            }
            Some(_) => {
                self.events.emit(&CacheEvent::Expire {
                    key: key.to_string(),
                });
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        self.events.emit(&CacheEvent::Clear);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_live())
            .and_then(|entry| entry.ttl_remaining()))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let size = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live())
            .count();
        let mut stats = self.stats.lock().clone();
        stats.size = size;
        Ok(stats)
    }

    fn events(&self) -> &EventEmitter {
        &self.events
    }

    // Native expiry refresh, no value round-trip
    async fn expire(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live() => {
                entry.refresh(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.stats().await?.size)
    }

    async fn destroy(&self) -> Result<()> {
        self.entries.write().await.clear();
        self.events.clear_listeners();
        Ok(())
    }
}
