//! ldcache - An embeddable key-value cache
//!
//! Provides a cache manager with pluggable eviction strategies, TTL
//! expiration, compute-once reads and swappable storage backends.

pub mod cache;
pub mod config;
pub mod error;
pub mod eviction;
pub mod store;
pub mod tasks;

pub use cache::{CacheEvent, CacheManager, CacheStats, EventEmitter, EventKind};
pub use config::{CacheConfig, EvictionStrategy};
pub use error::{CacheError, Result};
pub use eviction::EvictionPolicy;
pub use store::{CacheStore, CacheValue, MemoryStore, SharedStore, StoreExt};
pub use tasks::spawn_cleanup_task;
