//! TTL Cleanup Task
//!
//! Background task that periodically removes expired cache entries.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheManager;

/// Spawns a background task that periodically cleans up expired cache entries.
///
/// The task sleeps for `interval` between runs. It only holds a weak
/// reference, so it ends on its own once the manager is dropped.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort it.
///
/// # Example
/// ```ignore
/// let manager = Arc::new(CacheManager::new(CacheConfig::default())?);
/// let cleanup_handle = spawn_cleanup_task(Arc::downgrade(&manager), Duration::from_secs(1));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(manager: Weak<CacheManager>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "starting TTL cleanup task");

        loop {
            tokio::time::sleep(interval).await;

            let Some(manager) = manager.upgrade() else {
                break;
            };
            if manager.is_destroyed() {
                break;
            }

            let removed = manager.cleanup_expired().await;
            if removed > 0 {
                info!(removed, "TTL cleanup removed expired entries");
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }

        info!("TTL cleanup task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use std::sync::Arc;

    fn manager() -> Arc<CacheManager> {
        Arc::new(CacheManager::new(CacheConfig::default().with_max_size(100)).unwrap())
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let cache = manager();
        cache
            .set("expire_soon", "value", Some(Duration::from_millis(20)))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(Arc::downgrade(&cache), Duration::from_millis(50));

        // Wait for entry to expire and cleanup to run
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.store().len().await.unwrap(), 0);
        assert_eq!(cache.stats().expirations, 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let cache = manager();
        cache
            .set("long_lived", "value", Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(Arc::downgrade(&cache), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            cache.peek::<String>("long_lived").await.unwrap(),
            Some("value".to_string())
        );
        assert_eq!(cache.stats().expirations, 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let cache = manager();
        let handle = spawn_cleanup_task(Arc::downgrade(&cache), Duration::from_secs(1));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_when_manager_is_dropped() {
        let cache = manager();
        let handle = spawn_cleanup_task(Arc::downgrade(&cache), Duration::from_millis(10));

        drop(cache);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop on its own")
            .unwrap();
    }
}
