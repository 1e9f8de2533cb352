//! Serialization decorator.
//!
//! Stores every value as its JSON text so that text-only backends can hold
//! structured data. A stored string that does not parse is handed back
//! unchanged and reported as an error event. Forwarded `Set` events carry the
//! decoded value, as they would on an undecorated store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::cache::{CacheEvent, EventEmitter, ListenerId};
use crate::error::{CacheError, Result};
use crate::store::{CacheStore, CacheValue, SharedStore, StoreStats};

pub struct SerializingStore {
    inner: SharedStore,
    events: EventEmitter,
    forwarding: ListenerId,
    decode_errors: AtomicU64,
}

impl SerializingStore {
    pub fn new(inner: SharedStore) -> Self {
        let events = EventEmitter::new();
        let forwarding = inner.events().forward_map(&events, |event| {
            Some(match event {
                CacheEvent::Set { key, value } => CacheEvent::Set {
                    key: key.clone(),
                    value: value
                        .as_str()
                        .and_then(|text| serde_json::from_str(text).ok())
                        .unwrap_or_else(|| value.clone()),
                },
                other => other.clone(),
            })
        });
        Self {
            inner,
            events,
            forwarding,
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Number of stored values that failed to parse on read.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    fn encode(value: &CacheValue) -> Result<CacheValue> {
        Ok(CacheValue::String(serde_json::to_string(value)?))
    }

    fn decode(&self, key: &str, raw: CacheValue) -> CacheValue {
        // Non-strings were written by someone else without this decorator
        let Some(text) = raw.as_str() else {
            return raw;
        };
        match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %err, "stored value is not valid JSON, returning raw value");
                self.events.emit(&CacheEvent::Error {
                    error: CacheError::Serialization(format!(
                        "failed to deserialize '{}': {}",
                        key, err
                    )),
                });
                raw
            }
        }
    }
}

#[async_trait]
impl CacheStore for SerializingStore {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        Ok(self
            .inner
            .get(key)
            .await?
            .map(|raw| self.decode(key, raw)))
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        self.inner.set(key, Self::encode(&value)?, ttl).await
    }

    async fn has(&self, key: &str) -> Result<bool> {
        self.inner.has(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }

    fn events(&self) -> &EventEmitter {
        &self.events
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
        Ok(self
            .inner
            .mget(keys)
            .await?
            .into_iter()
            .map(|(key, raw)| {
                let value = self.decode(&key, raw);
                (key, value)
            })
            .collect())
    }

    async fn mset(&self, entries: Vec<(String, CacheValue)>, ttl: Option<Duration>) -> Result<()> {
        let encoded = entries
            .into_iter()
            .map(|(key, value)| Ok((key, Self::encode(&value)?)))
            .collect::<Result<Vec<_>>>()?;
        self.inner.mset(encoded, ttl).await
    }

    async fn mdel(&self, keys: &[String]) -> Result<usize> {
        self.inner.mdel(keys).await
    }

    async fn expire(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    // The inner store may be shared, so it is left running
    async fn destroy(&self) -> Result<()> {
        self.inner.events().off(self.forwarding);
        self.events.clear_listeners();
        Ok(())
    }
}

impl Drop for SerializingStore {
    fn drop(&mut self) {
        self.inner.events().off(self.forwarding);
    }
}
