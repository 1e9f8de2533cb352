//! Cache Module
//!
//! The cache manager and the pieces it is built from: entry metadata,
//! statistics, events and single-flight coordination.

mod entry;
mod events;
mod flight;
mod manager;
mod stats;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub use events::{CacheEvent, EventEmitter, EventKind, ListenerId};
pub use manager::CacheManager;
pub use stats::CacheStats;
