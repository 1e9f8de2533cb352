//! Compression decorator.
//!
//! Values whose JSON text is longer than the threshold are gzip-compressed,
//! base64-encoded and stored as a string that starts with
//! [`COMPRESSED_MARKER`]. Smaller values are stored untouched. On read, marked
//! strings are decoded transparently; a marked string that fails to decode is
//! handed back raw and reported as an error event. Forwarded `Set` events
//! carry the uncompressed value.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::warn;

use crate::cache::{CacheEvent, EventEmitter, ListenerId};
use crate::error::{CacheError, Result};
use crate::store::{CacheStore, CacheValue, SharedStore, StoreStats};

/// Prefix tagging a compressed payload.
pub const COMPRESSED_MARKER: &str = "\u{1}ldcache:gz:";

/// JSON text length above which values are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

const DEFAULT_LEVEL: u32 = 6;

pub struct CompressingStore {
    inner: SharedStore,
    threshold: usize,
    level: u32,
    events: EventEmitter,
    forwarding: ListenerId,
    compressed_writes: AtomicU64,
    decode_errors: AtomicU64,
}

impl CompressingStore {
    pub fn new(inner: SharedStore) -> Self {
        let events = EventEmitter::new();
        let forwarding = inner.events().forward_map(&events, |event| {
            Some(match event {
                CacheEvent::Set { key, value } => CacheEvent::Set {
                    key: key.clone(),
                    value: value
                        .as_str()
                        .and_then(|text| text.strip_prefix(COMPRESSED_MARKER))
                        .and_then(|payload| decompress(payload).ok())
                        .unwrap_or_else(|| value.clone()),
                },
                other => other.clone(),
            })
        });
        Self {
            inner,
            threshold: DEFAULT_COMPRESSION_THRESHOLD,
            level: DEFAULT_LEVEL,
            events,
            forwarding,
            compressed_writes: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    pub fn with_threshold(mut self, bytes: usize) -> Self {
        self.threshold = bytes;
        self
    }

    /// gzip level, clamped to 0..=9.
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of writes that were stored compressed.
    pub fn compressed_writes(&self) -> u64 {
        self.compressed_writes.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    // == Encode ==
    fn encode(&self, value: CacheValue) -> Result<CacheValue> {
        let text = serde_json::to_string(&value)?;
        if text.len() <= self.threshold {
            return Ok(value);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(text.as_bytes())
            .map_err(|err| CacheError::Compression(err.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|err| CacheError::Compression(err.to_string()))?;

        self.compressed_writes.fetch_add(1, Ordering::Relaxed);
        Ok(CacheValue::String(format!(
            "{}{}",
            COMPRESSED_MARKER,
            STANDARD.encode(compressed)
        )))
    }

    // == Decode ==
    fn decode(&self, key: &str, raw: CacheValue) -> CacheValue {
        let payload = match raw.as_str().and_then(|s| s.strip_prefix(COMPRESSED_MARKER)) {
            Some(payload) => payload,
            None => return raw,
        };
        match decompress(payload) {
            Ok(value) => value,
            Err(err) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %err, "compressed payload is corrupt, returning raw value");
                self.events.emit(&CacheEvent::Error { error: err });
                raw
            }
        }
    }
}

fn decompress(payload: &str) -> Result<CacheValue> {
    let compressed = STANDARD
        .decode(payload)
        .map_err(|err| CacheError::Compression(format!("invalid base64: {}", err)))?;
    let mut text = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut text)
        .map_err(|err| CacheError::Compression(format!("invalid gzip stream: {}", err)))?;
    Ok(serde_json::from_str(&text)?)
}

#[async_trait]
impl CacheStore for CompressingStore {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        Ok(self
            .inner
            .get(key)
            .await?
            .map(|raw| self.decode(key, raw)))
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        let stored = self.encode(value)?;
        self.inner.set(key, stored, ttl).await
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
            .map(|(key, value)| Ok((key, self.encode(value)?)))
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

impl Drop for CompressingStore {
    fn drop(&mut self) {
        self.inner.events().off(self.forwarding);
    }
}
