//! Store Module
//!
//! The backend contract a cache manager delegates to, the built-in backends,
//! and the decorators that wrap any backend.
//!
//! Every backend implements the small required set of operations. Batch and
//! expiry helpers have default implementations written in terms of the
//! single-key operations, so a new backend is complete as soon as the
//! required methods exist; backends override a default only when they can do
//! better natively.

mod compress;
mod file;
mod memory;
mod namespace;
mod serialize;

pub use compress::{CompressingStore, COMPRESSED_MARKER, DEFAULT_COMPRESSION_THRESHOLD};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use namespace::NamespacedStore;
pub use serialize::SerializingStore;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::cache::EventEmitter;
use crate::error::Result;

/// Payload type at the store boundary.
pub type CacheValue = serde_json::Value;

/// A store shared between managers and decorators.
pub type SharedStore = Arc<dyn CacheStore>;

// == Store Stats ==
/// Counters kept by a backend, independent of any manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Live entries visible through this store
    pub size: usize,
}

// == Cache Store ==
/// Backend storage contract.
///
/// Implementations must never return an expired entry and must keep at most
/// one entry per key. Errors are reported through `Result`; recovering from
/// them is the manager's job.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Live value for `key`, or None.
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Inserts or overwrites `key`. `ttl` of None means no expiry.
    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()>;

    /// Whether a live entry exists. Does not count as a hit or miss.
    async fn has(&self, key: &str) -> Result<bool>;

    /// Removes `key`. Returns true if it was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Removes every entry visible through this store.
    async fn clear(&self) -> Result<()>;

    /// Live keys visible through this store, in no particular order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Remaining lifetime of a live key; None when missing or without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn stats(&self) -> Result<StoreStats>;

    /// Emitter carrying this store's hit/miss/set/delete/expire/clear/error events.
    fn events(&self) -> &EventEmitter;

    // == Provided Operations ==

    /// Live values for `keys`; missing keys are absent from the map.
    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn mset(&self, entries: Vec<(String, CacheValue)>, ttl: Option<Duration>) -> Result<()> {
        for (key, value) in entries {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }

    /// Returns how many of `keys` were present.
    async fn mdel(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Resets the expiry of a live key. Returns false if the key is missing.
    async fn expire(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        match self.get(key).await? {
            Some(value) => {
                self.set(key, value, ttl).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }

    /// Releases backend resources. The store must not be used afterwards.
    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

/// Boxes a concrete store into a [`SharedStore`].
pub trait StoreExt: CacheStore + Sized + 'static {
    fn shared(self) -> SharedStore {
        Arc::new(self)
    }
}

impl<S: CacheStore + Sized + 'static> StoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEvent, EventKind};
    use parking_lot::Mutex;
    use serde_json::json;

    /// Minimal backend that only implements the required methods, so the
    /// provided operations are exercised as written.
    #[derive(Default)]
    struct BareStore {
        map: Mutex<HashMap<String, (CacheValue, Option<Duration>)>>,
        events: EventEmitter,
    }

    #[async_trait]
    impl CacheStore for BareStore {
        async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
            Ok(self.map.lock().get(key).map(|(v, _)| v.clone()))
        }

        async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
            self.map.lock().insert(key.to_string(), (value.clone(), ttl));
            self.events.emit(&CacheEvent::Set {
                key: key.to_string(),
                value,
            });
            Ok(())
        }

        async fn has(&self, key: &str) -> Result<bool> {
            Ok(self.map.lock().contains_key(key))
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            Ok(self.map.lock().remove(key).is_some())
        }

        async fn clear(&self) -> Result<()> {
            self.map.lock().clear();
            Ok(())
        }

        async fn keys(&self) -> Result<Vec<String>> {
            Ok(self.map.lock().keys().cloned().collect())
        }

        async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
            Ok(self.map.lock().get(key).and_then(|(_, ttl)| *ttl))
        }

        async fn stats(&self) -> Result<StoreStats> {
            Ok(StoreStats {
                size: self.map.lock().len(),
                ..StoreStats::default()
            })
        }

        fn events(&self) -> &EventEmitter {
            &self.events
        }
    }

    #[tokio::test]
    async fn test_default_batch_operations() {
        let store = BareStore::default();
        store
            .mset(
                vec![("a".into(), json!(1)), ("b".into(), json!({"x": [2]}))],
                None,
            )
            .await
            .unwrap();

        let found = store
            .mget(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], json!(1));
        assert_eq!(found["b"], json!({"x": [2]}));
        assert!(!found.contains_key("c"));

        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.mdel(&["a".into(), "c".into()]).await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_default_expire_rewrites_ttl() {
        let store = BareStore::default();
        let sets = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&sets);
        store.events().on(EventKind::Set, move |_| *sink.lock() += 1);

        store.set("k", json!("v"), None).await.unwrap();
        assert!(store.expire("k", Some(Duration::from_secs(5))).await.unwrap());
        assert!(!store.expire("missing", None).await.unwrap());

        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(5)));
        assert_eq!(store.get("k").await.unwrap(), Some(json!("v")));
        assert_eq!(*sets.lock(), 2);
    }

    #[tokio::test]
    async fn test_shared_boxes_store() {
        let store: SharedStore = BareStore::default().shared();
        store.set("k", json!(true), None).await.unwrap();
        assert!(store.has("k").await.unwrap());
        store.destroy().await.unwrap();
    }
}
