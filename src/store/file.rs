//! File Store Module
//!
//! Persists each entry as one JSON document in a directory. The document
//! name is the hex SHA-256 of the key, so arbitrary keys map to safe file
//! names. Writes go to a temporary file first and are renamed into place,
//! which keeps readers from seeing half-written documents.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheEvent, EventEmitter};
use crate::error::{CacheError, Result};
use crate::store::{CacheStore, CacheValue, StoreStats};

const DOCUMENT_EXTENSION: &str = "json";

/// On-disk layout of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    key: String,
    #[serde(flatten)]
    entry: CacheEntry<CacheValue>,
}

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    stats: Mutex<StoreStats>,
    temp_counter: AtomicU64,
    events: EventEmitter,
}

impl FileStore {
    // == Constructor ==
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "file store opened");
        Ok(Self {
            dir,
            stats: Mutex::new(StoreStats::default()),
            temp_counter: AtomicU64::new(0),
            events: EventEmitter::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{}.{}", digest, DOCUMENT_EXTENSION))
    }

    async fn read_document(&self, path: &Path) -> Result<Option<StoredDocument>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove_document(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Reads the live document for `key`, deleting it if it has expired.
    async fn live_document(&self, key: &str) -> Result<Option<StoredDocument>> {
        let path = self.path_for(key);
        let document = match self.read_document(&path).await? {
            Some(document) if document.key == key => document,
            Some(document) => {
                return Err(CacheError::Store(format!(
                    "document {} belongs to key '{}'",
                    path.display(),
                    document.key
                )))
            }
            None => return Ok(None),
        };

        if document.entry.is_expired() {
            self.remove_document(&path).await?;
            self.events.emit(&CacheEvent::Expire {
                key: key.to_string(),
            });
            return Ok(None);
        }
        Ok(Some(document))
    }

    async fn write_document(&self, document: &StoredDocument) -> Result<()> {
        let path = self.path_for(&document.key);
        let bytes = serde_json::to_vec(document)?;
        let temp = path.with_extension(format!(
            "tmp-{}",
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp, &bytes).await?;
        if let Err(err) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Every parseable document in the directory, live or not.
    async fn scan(&self) -> Result<Vec<(PathBuf, StoredDocument)>> {
        let mut documents = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            match self.read_document(&path).await {
                Ok(Some(document)) => documents.push((path, document)),
                Ok(None) => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable cache document");
                }
            }
        }
        Ok(documents)
    }

    // == Purge Expired ==
    /// Deletes expired documents. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for (path, document) in self.scan().await? {
            if document.entry.is_expired() && self.remove_document(&path).await? {
                self.events.emit(&CacheEvent::Expire { key: document.key });
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        match self.live_document(key).await? {
            Some(document) => {
                self.stats.lock().hits += 1;
                self.events.emit(&CacheEvent::Hit {
                    key: key.to_string(),
                });
                Ok(Some(document.entry.value))
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

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        let document = StoredDocument {
            key: key.to_string(),
            entry: CacheEntry::new(value, ttl),
        };
        self.write_document(&document).await?;
        self.stats.lock().sets += 1;
        self.events.emit(&CacheEvent::Set {
            key: document.key,
            value: document.entry.value,
        });
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.live_document(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let live = self.live_document(key).await?.is_some();
        if !live {
            return Ok(false);
        }
        let removed = self.remove_document(&self.path_for(key)).await?;
        if removed {
            self.stats.lock().deletes += 1;
            self.events.emit(&CacheEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        for (path, _) in self.scan().await? {
            self.remove_document(&path).await?;
        }
        self.events.emit(&CacheEvent::Clear);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter(|(_, document)| document.entry.is_live())
            .map(|(_, document)| document.key)
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self
            .live_document(key)
            .await?
            .and_then(|document| document.entry.ttl_remaining()))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let size = self.keys().await?.len();
        let mut stats = self.stats.lock().clone();
        stats.size = size;
        Ok(stats)
    }

    fn events(&self) -> &EventEmitter {
        &self.events
    }

    async fn expire(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        match self.live_document(key).await? {
            Some(mut document) => {
                document.entry.refresh(ttl);
                self.write_document(&document).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn destroy(&self) -> Result<()> {
        self.events.clear_listeners();
        Ok(())
    }
}
