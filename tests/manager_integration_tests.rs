//! Integration Tests for the Cache Manager
//!
//! Exercises the manager through the public API over each backend and
//! decorator stack.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ldcache::store::{CompressingStore, FileStore, NamespacedStore, SerializingStore};
use ldcache::{
    CacheConfig, CacheError, CacheEvent, CacheManager, CacheStore, CacheValue, EventKind,
    EvictionStrategy, MemoryStore, SharedStore, StoreExt,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// == Helper Functions ==

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn namespaced(shared: &SharedStore, namespace: &str, max_size: usize) -> CacheManager {
    let store = NamespacedStore::new(Arc::clone(shared), namespace).shared();
    CacheManager::with_store(CacheConfig::default().with_max_size(max_size), store).unwrap()
}

fn sorted(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u64,
    name: String,
    tags: Vec<String>,
}

fn profile(id: u64) -> Profile {
    Profile {
        id,
        name: format!("user-{}", id),
        tags: vec!["a".into(), "b".into()],
    }
}

// == Namespaced Stores ==

#[tokio::test]
async fn test_managers_sharing_a_store_are_isolated() {
    init_tracing();
    let shared = MemoryStore::new().shared();
    let users = namespaced(&shared, "users", 10);
    let orders = namespaced(&shared, "orders", 10);

    users.set("1", profile(1), None).await.unwrap();
    orders.set("1", json!({"total": 99}), None).await.unwrap();

    assert_eq!(users.get::<Profile>("1").await.unwrap(), Some(profile(1)));
    assert_eq!(
        orders.get::<CacheValue>("1").await.unwrap(),
        Some(json!({"total": 99}))
    );
    assert_eq!(
        sorted(shared.keys().await.unwrap()),
        vec!["orders:1".to_string(), "users:1".to_string()]
    );

    users.clear().await;

    assert_eq!(users.get::<Profile>("1").await.unwrap(), None);
    assert_eq!(
        orders.get::<CacheValue>("1").await.unwrap(),
        Some(json!({"total": 99}))
    );
    assert_eq!(shared.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_eviction_is_per_namespace() {
    let shared = MemoryStore::new().shared();
    let small = namespaced(&shared, "small", 2);
    let large = namespaced(&shared, "large", 10);

    for i in 0..5 {
        small.set(&format!("k{}", i), i, None).await.unwrap();
        large.set(&format!("k{}", i), i, None).await.unwrap();
    }

    assert_eq!(sorted(small.keys()), vec!["k3", "k4"]);
    assert_eq!(large.size(), 5);
    assert_eq!(shared.len().await.unwrap(), 7);
    assert_eq!(small.stats().evictions, 3);
}

#[tokio::test]
async fn test_destroying_one_manager_spares_the_others() {
    let raw = MemoryStore::new().shared();
    let decoded = SerializingStore::new(Arc::clone(&raw)).shared();
    let a = CacheManager::with_store(CacheConfig::default(), Arc::clone(&decoded)).unwrap();
    let b = CacheManager::with_store(CacheConfig::default(), Arc::clone(&decoded)).unwrap();

    b.set("bkey", 1, None).await.unwrap();
    a.destroy().await;

    assert_eq!(b.get::<i32>("bkey").await.unwrap(), Some(1));

    // b keeps counting decoder failures after a is gone
    raw.set("bad", json!("{oops"), None).await.unwrap();
    b.get::<CacheValue>("bad").await.unwrap();
    assert_eq!(b.stats().errors, 1);
}

#[tokio::test]
async fn test_short_lived_managers_release_store_listeners() {
    let shared = MemoryStore::new().shared();
    let before = shared.events().listener_count();

    for i in 0..100 {
        let cache = namespaced(&shared, &format!("job{}", i), 10);
        cache.set("k", i, None).await.unwrap();
        cache.destroy().await;
    }

    assert_eq!(shared.events().listener_count(), before);
    assert_eq!(shared.len().await.unwrap(), 100);
}

// == Decorator Stacks ==

#[tokio::test]
async fn test_compressed_serialized_stack_round_trips() {
    let raw = MemoryStore::new().shared();
    let store = CompressingStore::new(SerializingStore::new(Arc::clone(&raw)).shared())
        .with_threshold(64)
        .shared();
    let cache = CacheManager::with_store(CacheConfig::default(), store).unwrap();

    let profiles: Vec<Profile> = (0..50).map(profile).collect();
    cache.set("all", &profiles, None).await.unwrap();

    assert_eq!(cache.get::<Vec<Profile>>("all").await.unwrap(), Some(profiles));
    // Underneath, only text is stored
    assert!(raw.get("all").await.unwrap().unwrap().is_string());
    assert_eq!(cache.stats().errors, 0);
}

#[tokio::test]
async fn test_decoder_failures_surface_as_manager_errors() {
    let raw = MemoryStore::new().shared();
    let cache = CacheManager::with_store(
        CacheConfig::default(),
        SerializingStore::new(Arc::clone(&raw)).shared(),
    )
    .unwrap();
    let errors = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&errors);
    cache.events().on(EventKind::Error, move |event| {
        assert!(matches!(
            event,
            CacheEvent::Error {
                error: CacheError::Serialization(_)
            }
        ));
        sink.fetch_add(1, Ordering::SeqCst);
    });

    raw.set("bad", json!("{not json"), None).await.unwrap();

    // The raw stored text comes back rather than a miss
    assert_eq!(
        cache.get::<CacheValue>("bad").await.unwrap(),
        Some(json!("{not json"))
    );
    let stats = cache.stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

// == File Store ==

#[tokio::test]
async fn test_file_backed_manager_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = FileStore::open(dir.path()).await.unwrap().shared();
        let cache = CacheManager::with_store(CacheConfig::default(), store).unwrap();
        cache
            .set("config", profile(7), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        cache.set("scratch", 1, Some(Duration::from_millis(20))).await.unwrap();
        cache.destroy().await;
    }

    tokio::time::sleep(Duration::from_millis(40)).await;

    let store = FileStore::open(dir.path()).await.unwrap().shared();
    let cache = CacheManager::with_store(CacheConfig::default(), store).unwrap();

    assert_eq!(cache.get::<Profile>("config").await.unwrap(), Some(profile(7)));
    assert_eq!(cache.get::<i32>("scratch").await.unwrap(), None);
    assert_eq!(cache.keys(), vec!["config".to_string()]);
    let remaining = cache.ttl("config").await.unwrap();
    assert!(remaining <= Duration::from_secs(60));
    assert!(remaining > Duration::from_secs(50));
}

#[tokio::test]
async fn test_corrupt_file_reads_as_miss() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).await.unwrap().shared();
    let cache = CacheManager::with_store(CacheConfig::default(), store).unwrap();
    cache.set("k", "v", None).await.unwrap();

    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let document = entries.next_entry().await.unwrap().unwrap();
    tokio::fs::write(document.path(), b"{ truncated").await.unwrap();

    assert_eq!(cache.get::<String>("k").await.unwrap(), None);
    let stats = cache.stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_file_backed_manager_evicts_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).await.unwrap().shared();
    let config = CacheConfig::default()
        .with_max_size(2)
        .with_strategy(EvictionStrategy::Fifo);
    let cache = CacheManager::with_store(config, Arc::clone(&store)).unwrap();

    cache.set("a", 1, None).await.unwrap();
    cache.set("b", 2, None).await.unwrap();
    cache.set("c", 3, None).await.unwrap();

    assert_eq!(sorted(store.keys().await.unwrap()), vec!["b", "c"]);
}

// == Events ==

#[tokio::test]
async fn test_event_stream_follows_operations() {
    let cache = CacheManager::new(CacheConfig::default().with_max_size(1)).unwrap();
    let mut rx = cache.events().subscribe();

    cache.set("a", 1, None).await.unwrap();
    cache.get::<i32>("a").await.unwrap();
    cache.get::<i32>("zz").await.unwrap();
    cache.set("b", 2, None).await.unwrap();
    cache.delete("b").await;
    cache.clear().await;

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind());
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::Set,
            EventKind::Hit,
            EventKind::Miss,
            EventKind::Set,
            EventKind::Evicted,
            EventKind::Delete,
            EventKind::Clear,
        ]
    );
}

#[tokio::test]
async fn test_get_or_set_over_shared_manager() {
    let cache = Arc::new(CacheManager::new(CacheConfig::default()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks = (0..16).map(|_| {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        async move {
            cache
                .get_or_set(
                    "report",
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, std::io::Error>(profile(1))
                    },
                    Some(Duration::from_secs(5)),
                )
                .await
        }
    });
    let results = futures::future::join_all(tasks).await;

    assert!(results.iter().all(|r| r.as_ref().ok() == Some(&profile(1))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
