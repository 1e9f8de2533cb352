//! Namespacing decorator.
//!
//! Prefixes every key with `"{namespace}:"` before delegating. Several
//! namespaces can share one physical store without seeing each other's keys:
//! listing, clearing and sizing only ever touch the decorator's own prefix.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{CacheEvent, EventEmitter, ListenerId};
use crate::error::{CacheError, Result};
use crate::store::{CacheStore, CacheValue, SharedStore, StoreStats};

pub struct NamespacedStore {
    inner: SharedStore,
    namespace: String,
    prefix: String,
    events: EventEmitter,
    forwarding: ListenerId,
}

impl NamespacedStore {
    pub fn new(inner: SharedStore, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let prefix = format!("{}:", namespace);
        let events = EventEmitter::new();

        // Other namespaces' key events stay out of this decorator's stream
        let strip = prefix.clone();
        let forwarding = inner.events().forward_map(&events, move |event| {
            let key = match event.key() {
                Some(key) => key,
                None => return Some(event.clone()),
            };
            let local = key.strip_prefix(strip.as_str())?.to_string();
            Some(match event {
                CacheEvent::Hit { .. } => CacheEvent::Hit { key: local },
                CacheEvent::Miss { .. } => CacheEvent::Miss { key: local },
                CacheEvent::Set { value, .. } => CacheEvent::Set {
                    key: local,
                    value: value.clone(),
                },
                CacheEvent::Delete { .. } => CacheEvent::Delete { key: local },
                CacheEvent::Evicted { .. } => CacheEvent::Evicted { key: local },
                CacheEvent::Expire { .. } => CacheEvent::Expire { key: local },
                CacheEvent::Error { .. } | CacheEvent::Clear => event.clone(),
            })
        });

        Self {
            inner,
            namespace,
            prefix,
            events,
            forwarding,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn qualify(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn qualify_all(&self, keys: &[String]) -> Vec<String> {
        keys.iter().map(|key| self.qualify(key)).collect()
    }

    async fn own_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .inner
            .keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(&self.prefix))
            .collect())
    }
}

#[async_trait]
impl CacheStore for NamespacedStore {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.inner.get(&self.qualify(key)).await
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        self.inner.set(&self.qualify(key), value, ttl).await
    }

    async fn has(&self, key: &str) -> Result<bool> {
        self.inner.has(&self.qualify(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(&self.qualify(key)).await
    }

    /// Removes only this namespace's keys.
    async fn clear(&self) -> Result<()> {
        let keys = self.own_keys().await?;
        self.inner.mdel(&keys).await?;
        self.events.emit(&CacheEvent::Clear);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .own_keys()
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.inner.ttl(&self.qualify(key)).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut stats = self.inner.stats().await?;
        stats.size = self.own_keys().await?.len();
        Ok(stats)
    }

    fn events(&self) -> &EventEmitter {
        &self.events
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
        let found = self.inner.mget(&self.qualify_all(keys)).await?;
        found
            .into_iter()
            .map(|(key, value)| match key.strip_prefix(&self.prefix) {
                Some(local) => Ok((local.to_string(), value)),
                None => Err(CacheError::Store(format!(
                    "inner store returned foreign key '{}'",
                    key
                ))),
            })
            .collect()
    }

    async fn mset(&self, entries: Vec<(String, CacheValue)>, ttl: Option<Duration>) -> Result<()> {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (self.qualify(&key), value))
            .collect();
        self.inner.mset(entries, ttl).await
    }

    async fn mdel(&self, keys: &[String]) -> Result<usize> {
        self.inner.mdel(&self.qualify_all(keys)).await
    }

    async fn expire(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        self.inner.expire(&self.qualify(key), ttl).await
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.own_keys().await?.len())
    }

    // The inner store may be shared, so it is left running
    async fn destroy(&self) -> Result<()> {
        self.inner.events().off(self.forwarding);
        self.events.clear_listeners();
        Ok(())
    }
}

impl Drop for NamespacedStore {
    fn drop(&mut self) {
        self.inner.events().off(self.forwarding);
    }
}
