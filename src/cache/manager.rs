//! Cache Manager Module
//!
//! The public façade: capacity enforcement, TTL bookkeeping, statistics,
//! events and compute-once reads layered over any [`CacheStore`].
//!
//! The manager keeps its own index of the keys it has written (expiry plus
//! eviction-policy state) and delegates values to the store. Store I/O always
//! happens before the index is updated and outside the index lock, so a
//! failed store call leaves the bookkeeping exactly as it was.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::entry::{current_timestamp_ms, expiry_from, is_expired_at, remaining_from};
use crate::cache::flight::SingleFlight;
use crate::cache::{CacheEntry, CacheEvent, CacheStats, EventEmitter, EventKind, ListenerId};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::eviction::{policy_for, EvictionPolicy};
use crate::store::{CacheStore, CacheValue, MemoryStore, SharedStore, StoreExt};
use crate::tasks::spawn_cleanup_task;

// == Index ==
/// Keys of the manager's logical view with their expiry metadata.
struct Index {
    entries: HashMap<String, CacheEntry<()>>,
    policy: Box<dyn EvictionPolicy>,
}

/// Keys dropped from the index to make room; their values still have to be
/// removed from the store.
#[derive(Default)]
struct Admission {
    evicted: Vec<String>,
    expired: Vec<String>,
}

impl Index {
    fn new(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
        }
    }

    fn is_tracked(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn untrack(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.policy.on_remove(key);
        }
        removed
    }

    /// Removes `key` if it is tracked and expired at `now`.
    fn take_expired(&mut self, key: &str, now: u64) -> bool {
        match self.entries.get(key) {
            Some(meta) if is_expired_at(meta.expires_at, now) => self.untrack(key),
            _ => false,
        }
    }

    fn expired_keys(&self, now: u64) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, meta)| is_expired_at(meta.expires_at, now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn live_len(&self, now: u64) -> usize {
        self.entries
            .values()
            .filter(|meta| !is_expired_at(meta.expires_at, now))
            .count()
    }

    // == Admit ==
    /// Records a write of `key`, making room first when it is a new key.
    ///
    /// Expired entries are reclaimed before any live entry is evicted.
    /// Afterwards the index never holds more than `max_size` keys.
    fn admit(&mut self, key: &str, meta: CacheEntry<()>, max_size: usize, now: u64) -> Admission {
        if let Some(existing) = self.entries.get_mut(key) {
            *existing = meta;
            self.policy.on_update(key);
            return Admission::default();
        }

        let mut admission = Admission::default();
        if self.entries.len() >= max_size {
            for expired in self.expired_keys(now) {
                self.untrack(&expired);
                admission.expired.push(expired);
            }
        }

        while self.entries.len() >= max_size {
            let victim = match self.policy.victim() {
                Some(candidate) if self.entries.contains_key(&candidate) => candidate,
                Some(stale) => {
                    self.policy.on_remove(&stale);
                    continue;
                }
                // Policy lost track of the index; any key will do
                None => match self.entries.keys().next().cloned() {
                    Some(key) => key,
                    None => break,
                },
            };
            self.untrack(&victim);
            admission.evicted.push(victim);
        }

        self.entries.insert(key.to_string(), meta);
        self.policy.on_insert(key);
        admission
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.policy.clear();
    }
}

// == Cache Manager ==
/// Cache façade with eviction, TTL and hit/miss accounting.
///
/// All operations are async so that memory and I/O-bound backends can be
/// swapped freely. Store failures never escape: they are counted in
/// `errors`, emitted as [`CacheEvent::Error`] and the operation degrades to
/// a miss or a no-op.
pub struct CacheManager {
    config: CacheConfig,
    store: SharedStore,
    index: Mutex<Index>,
    stats: Arc<Mutex<CacheStats>>,
    events: EventEmitter,
    flights: SingleFlight,
    cleanup: Mutex<Option<JoinHandle<()>>>,
    store_listener: ListenerId,
    /// Set when the manager built its own store and may tear it down
    owns_store: bool,
    destroyed: AtomicBool,
}

impl CacheManager {
    // == Constructors ==
    /// Manager over a private in-memory store.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let mut manager = Self::with_store(config, MemoryStore::new().shared())?;
        manager.owns_store = true;
        Ok(manager)
    }

    /// Manager over an injected store, which may be shared or decorated.
    ///
    /// The store is never torn down by this manager; [`destroy`](Self::destroy)
    /// only detaches from it.
    pub fn with_store(config: CacheConfig, store: SharedStore) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(Mutex::new(CacheStats::new()));
        let events = EventEmitter::new();

        // Decorator failures (e.g. undecodable values) surface as manager errors
        let store_listener = {
            let stats = Arc::clone(&stats);
            let events = events.clone();
            store.events().on(EventKind::Error, move |event| {
                stats.lock().record_error();
                events.emit(event);
            })
        };

        debug!(
            max_size = config.max_size,
            strategy = %config.strategy,
            "cache manager created"
        );

        Ok(Self {
            index: Mutex::new(Index::new(policy_for(config.strategy))),
            config,
            store,
            stats,
            events,
            flights: SingleFlight::new(),
            cleanup: Mutex::new(None),
            store_listener,
            owns_store: false,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Builds a shared manager and starts the periodic sweep when
    /// `cleanup_interval` is configured. Must be called inside a Tokio runtime
    /// in that case.
    pub fn shared(config: CacheConfig) -> Result<Arc<Self>> {
        let interval = config.cleanup_interval;
        let manager = Arc::new(Self::new(config)?);
        if let Some(interval) = interval {
            manager.start_cleanup(interval);
        }
        Ok(manager)
    }

    /// Replaces the eviction policy, e.g. with a seeded [`RandomPolicy`].
    ///
    /// [`RandomPolicy`]: crate::eviction::RandomPolicy
    pub fn with_policy(self, mut policy: Box<dyn EvictionPolicy>) -> Self {
        {
            let mut index = self.index.lock();
            for key in index.entries.keys() {
                policy.on_insert(key);
            }
            index.policy = policy;
        }
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Manager-level events: hit, miss, set, delete, evicted, expire, error, clear.
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(CacheError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.or(self.config.default_ttl)
    }

    // == Recording ==
    fn record_store_error(&self, op: &'static str, key: &str, err: CacheError) {
        warn!(op, key, error = %err, "cache store operation failed");
        self.stats.lock().record_error();
        self.events.emit(&CacheEvent::Error { error: err });
    }

    fn record_hit(&self, key: &str) {
        debug!(key, "cache hit");
        self.stats.lock().record_hit();
        self.events.emit(&CacheEvent::Hit {
            key: key.to_string(),
        });
    }

    fn record_miss(&self, key: &str) {
        debug!(key, "cache miss");
        self.stats.lock().record_miss();
        self.events.emit(&CacheEvent::Miss {
            key: key.to_string(),
        });
    }

    /// Removes values dropped from the index by an admission.
    async fn settle(&self, admission: Admission) {
        for key in admission.expired {
            self.drop_from_store("expire", &key).await;
            self.stats.lock().record_expiration();
            debug!(key = %key, "cache entry expired");
            self.events.emit(&CacheEvent::Expire { key });
        }
        for key in admission.evicted {
            self.drop_from_store("evict", &key).await;
            self.stats.lock().record_eviction();
            debug!(key = %key, strategy = %self.config.strategy, "cache entry evicted");
            self.events.emit(&CacheEvent::Evicted { key });
        }
    }

    async fn drop_from_store(&self, op: &'static str, key: &str) {
        if let Err(err) = self.store.delete(key).await {
            self.record_store_error(op, key, err);
        }
    }

    /// Purges `key` lazily if the index says it has expired.
    async fn expire_if_stale(&self, key: &str) -> bool {
        let expired = self.index.lock().take_expired(key, current_timestamp_ms());
        if expired {
            self.settle(Admission {
                expired: vec![key.to_string()],
                ..Admission::default()
            })
            .await;
        }
        expired
    }

    /// Notes a read hit, adopting keys the store holds but the index does not
    /// know (persistent or shared backends).
    async fn note_access(&self, key: &str) {
        {
            let mut index = self.index.lock();
            if index.is_tracked(key) {
                index.policy.on_access(key);
                return;
            }
        }

        let remaining = match self.store.ttl(key).await {
            Ok(remaining) => remaining,
            Err(err) => {
                self.record_store_error("ttl", key, err);
                None
            }
        };
        let now = current_timestamp_ms();
        let meta = CacheEntry {
            value: (),
            created_at: now,
            expires_at: remaining.map(|ttl| expiry_from(now, ttl)),
        };
        let admission = {
            let mut index = self.index.lock();
            let admission = index.admit(key, meta, self.config.max_size, now);
            index.policy.on_access(key);
            admission
        };
        self.settle(admission).await;
    }

    /// Live value with hit/miss accounting.
    async fn lookup(&self, key: &str) -> Option<CacheValue> {
        if self.expire_if_stale(key).await {
            self.record_miss(key);
            return None;
        }

        match self.store.get(key).await {
            Ok(Some(value)) => {
                self.note_access(key).await;
                self.record_hit(key);
                Some(value)
            }
            Ok(None) => {
                // The store dropped it on its own (its TTL, external delete)
                self.index.lock().untrack(key);
                self.record_miss(key);
                None
            }
            Err(err) => {
                self.record_store_error("get", key, err);
                self.record_miss(key);
                None
            }
        }
    }

    // == Get ==
    /// Returns the live value for `key`, or None.
    ///
    /// Store failures read as a miss. An error is returned only when a live
    /// value cannot be converted into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.ensure_alive()?;
        match self.lookup(key).await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Untyped [`get`](Self::get).
    pub async fn get_value(&self, key: &str) -> Result<Option<CacheValue>> {
        self.ensure_alive()?;
        Ok(self.lookup(key).await)
    }

    /// Live value without touching statistics, events or recency order.
    pub async fn peek<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.ensure_alive()?;
        match self.peek_value(key).await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn peek_value(&self, key: &str) -> Option<CacheValue> {
        let stale = {
            let index = self.index.lock();
            index
                .entries
                .get(key)
                .is_some_and(|meta| is_expired_at(meta.expires_at, current_timestamp_ms()))
        };
        if stale {
            return None;
        }
        match self.store.get(key).await {
            Ok(value) => value,
            Err(err) => {
                self.record_store_error("peek", key, err);
                None
            }
        }
    }

    // == Set ==
    /// Inserts or overwrites `key`.
    ///
    /// The TTL is `ttl` if given, else the configured default, else none.
    /// Writing a new key into a full cache evicts one entry first (expired
    /// entries are reclaimed before a live one is evicted). A failed store
    /// write is a no-op.
    pub async fn set<T: Serialize>(&self, key: &str, value: T, ttl: Option<Duration>) -> Result<()> {
        self.ensure_alive()?;
        let value = serde_json::to_value(value)?;
        self.write_value(key, value, ttl).await;
        Ok(())
    }

    async fn write_value(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> bool {
        let ttl = self.effective_ttl(ttl);
        if let Err(err) = self.store.set(key, value.clone(), ttl).await {
            self.record_store_error("set", key, err);
            return false;
        }

        let now = current_timestamp_ms();
        let meta = CacheEntry {
            value: (),
            created_at: now,
            expires_at: ttl.map(|ttl| expiry_from(now, ttl)),
        };
        let admission = self
            .index
            .lock()
            .admit(key, meta, self.config.max_size, now);

        self.stats.lock().record_set();
        debug!(key, ttl_ms = ?ttl.map(|t| t.as_millis()), "cache set");
        self.events.emit(&CacheEvent::Set {
            key: key.to_string(),
            value,
        });
        self.settle(admission).await;
        true
    }

    // == Has ==
    /// True iff `key` is present and live. Hit/miss counters are untouched.
    pub async fn has(&self, key: &str) -> bool {
        if self.is_destroyed() || self.expire_if_stale(key).await {
            return false;
        }
        match self.store.has(key).await {
            Ok(true) => {
                self.note_access(key).await;
                true
            }
            Ok(false) => {
                self.index.lock().untrack(key);
                false
            }
            Err(err) => {
                self.record_store_error("has", key, err);
                false
            }
        }
    }

    // == Delete ==
    /// Removes `key`. Returns true only when a live entry was removed.
    pub async fn delete(&self, key: &str) -> bool {
        if self.is_destroyed() {
            return false;
        }
        match self.store.delete(key).await {
            Ok(removed) => {
                self.index.lock().untrack(key);
                if removed {
                    self.stats.lock().record_delete();
                    debug!(key, "cache delete");
                    self.events.emit(&CacheEvent::Delete {
                        key: key.to_string(),
                    });
                }
                removed
            }
            Err(err) => {
                self.record_store_error("delete", key, err);
                false
            }
        }
    }

    // == Clear ==
    /// Removes every entry. Lifetime counters are kept.
    pub async fn clear(&self) {
        if self.is_destroyed() {
            return;
        }
        match self.store.clear().await {
            Ok(()) => {
                self.index.lock().clear();
                debug!("cache cleared");
                self.events.emit(&CacheEvent::Clear);
            }
            Err(err) => self.record_store_error("clear", "*", err),
        }
    }

    // == Touch ==
    /// Resets the expiry of a live entry to `ttl` from now.
    ///
    /// The value and the eviction order are left alone. Returns false if the
    /// key is missing, expired, or the store refused.
    pub async fn touch(&self, key: &str, ttl: Duration) -> bool {
        if self.is_destroyed() || self.expire_if_stale(key).await {
            return false;
        }
        match self.store.expire(key, Some(ttl)).await {
            Ok(true) => {
                let now = current_timestamp_ms();
                let adopted = {
                    let mut index = self.index.lock();
                    match index.entries.get_mut(key) {
                        Some(meta) => {
                            meta.expires_at = Some(expiry_from(now, ttl));
                            None
                        }
                        None => {
                            let meta = CacheEntry {
                                value: (),
                                created_at: now,
                                expires_at: Some(expiry_from(now, ttl)),
                            };
                            Some(index.admit(key, meta, self.config.max_size, now))
                        }
                    }
                };
                if let Some(admission) = adopted {
                    self.settle(admission).await;
                }
                true
            }
            Ok(false) => {
                self.index.lock().untrack(key);
                false
            }
            Err(err) => {
                self.record_store_error("touch", key, err);
                false
            }
        }
    }

    /// Remaining lifetime of a live key; None when missing or without expiry.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        if self.is_destroyed() {
            return None;
        }
        let now = current_timestamp_ms();
        let tracked = self
            .index
            .lock()
            .entries
            .get(key)
            .map(|meta| meta.expires_at);
        match tracked {
            Some(expires_at) if is_expired_at(expires_at, now) => None,
            Some(expires_at) => remaining_from(expires_at, now),
            None => match self.store.ttl(key).await {
                Ok(remaining) => remaining,
                Err(err) => {
                    self.record_store_error("ttl", key, err);
                    None
                }
            },
        }
    }

    // == Batch Operations ==
    /// Live values for `keys`; missing keys are absent from the map.
    ///
    /// Equivalent to calling [`get`](Self::get) for each key in order.
    pub async fn mget<T, I>(&self, keys: I) -> Result<HashMap<String, T>>
    where
        T: DeserializeOwned,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.ensure_alive()?;
        let mut found = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            if let Some(value) = self.get::<T>(key).await? {
                found.insert(key.to_string(), value);
            }
        }
        Ok(found)
    }

    /// Writes every pair with the same TTL, in iteration order.
    pub async fn mset<K, T, I>(&self, entries: I, ttl: Option<Duration>) -> Result<()>
    where
        K: AsRef<str>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        self.ensure_alive()?;
        for (key, value) in entries {
            self.set(key.as_ref(), value, ttl).await?;
        }
        Ok(())
    }

    /// Deletes every key; returns how many were removed.
    pub async fn mdel<I>(&self, keys: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut removed = 0;
        for key in keys {
            if self.delete(key.as_ref()).await {
                removed += 1;
            }
        }
        removed
    }

    // == Get Or Set ==
    /// Returns the cached value, computing and storing it on a miss.
    ///
    /// Concurrent callers missing on the same key share a single `factory`
    /// invocation and all receive its value or its error. A failed factory
    /// stores nothing. The stored TTL is `ttl` (or the default) as of when
    /// the factory resolves.
    pub async fn get_or_set<T, F, Fut, E>(&self, key: &str, factory: F, ttl: Option<Duration>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        if let Some(value) = self.get::<T>(key).await? {
            return Ok(value);
        }

        let value = self
            .flights
            .run(key, || async move {
                // A flight that finished just before this one started has
                // already stored the value
                if let Some(value) = self.peek_value(key).await {
                    return Ok(value);
                }
                let computed = factory().await.map_err(CacheError::factory)?;
                let value = serde_json::to_value(computed)?;
                self.write_value(key, value.clone(), ttl).await;
                Ok(value)
            })
            .await?;

        Ok(serde_json::from_value(value)?)
    }

    // == Introspection ==
    /// Live keys of this manager's view, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        let now = current_timestamp_ms();
        self.index
            .lock()
            .entries
            .iter()
            .filter(|(_, meta)| !is_expired_at(meta.expires_at, now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        self.index.lock().live_len(current_timestamp_ms())
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let size = self.size();
        self.stats.lock().snapshot(size)
    }

    // == Cleanup Expired ==
    /// Purges every expired entry from the index and the store.
    ///
    /// Returns the number of entries removed.
    pub async fn cleanup_expired(&self) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        let expired = {
            let mut index = self.index.lock();
            let keys = index.expired_keys(current_timestamp_ms());
            for key in &keys {
                index.untrack(key);
            }
            keys
        };
        let count = expired.len();
        self.settle(Admission {
            expired,
            ..Admission::default()
        })
        .await;
        count
    }

    /// Starts the periodic expiry sweep, replacing a running one.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) {
        let handle = spawn_cleanup_task(Arc::downgrade(self), interval);
        if let Some(previous) = self.cleanup.lock().replace(handle) {
            previous.abort();
        }
    }

    // == Destroy ==
    /// Stops the sweep, drops listeners and detaches from the store.
    ///
    /// A private store built by [`new`](Self::new) is torn down too; an
    /// injected store keeps its data and its other listeners. Idempotent.
    /// Afterwards reads miss, writes are rejected with
    /// [`CacheError::Destroyed`] and nothing is emitted.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.cleanup.lock().take() {
            handle.abort();
        }
        self.store.events().off(self.store_listener);
        self.events.clear_listeners();
        self.index.lock().clear();
        if self.owns_store {
            if let Err(err) = self.store.destroy().await {
                warn!(error = %err, "cache store teardown failed");
            }
        }
        info!("cache manager destroyed");
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.get_mut().take() {
            handle.abort();
        }
        self.store.events().off(self.store_listener);
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("size", &self.size())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
