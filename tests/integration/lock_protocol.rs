//! Write-lock protocol over the global cache.

use async_trait::async_trait;
use quarry::cache::{
    global_cache_key, global_get, global_set, lock_for_write, unlock_for_write, CasToken,
    GlobalCache, InProcessGlobalCache, Watch, LOCKED,
};
use quarry::config::{CachePolicy, ClientConfig};
use quarry::datastore::DatastoreRpc;
use quarry::error::{CacheError, RpcError};
use quarry::key::{Id, Key};
use quarry::wire::{RunQueryRequest, RunQueryResponse};
use quarry::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct NoopDatastore;

#[async_trait]
impl DatastoreRpc for NoopDatastore {
    async fn run_query(&self, _request: RunQueryRequest) -> Result<RunQueryResponse, RpcError> {
        Err(RpcError::Transport("unused".to_string()))
    }
}

fn context_with(cache: Arc<dyn GlobalCache>) -> Arc<Context> {
    Context::builder(Arc::new(NoopDatastore))
        .global_cache(cache)
        .build()
}

fn doc_key(id: i64) -> Key {
    Key::new("Doc", Id::IntId(id))
}

#[tokio::test]
async fn test_locked_identity_reads_as_absent() {
    let cache = Arc::new(InProcessGlobalCache::new());
    let ctx = context_with(cache.clone());
    let key = doc_key(1);

    lock_for_write(&ctx, &key).await.unwrap();

    // The raw backend holds the sentinel, but readers see a miss.
    let raw = cache
        .get(vec![global_cache_key(&key)])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(raw.as_deref(), Some(LOCKED));
    assert_eq!(global_get(&ctx, &key).await.unwrap(), None);
}

#[tokio::test]
async fn test_lock_shadows_existing_value() {
    let cache = Arc::new(InProcessGlobalCache::new());
    let ctx = context_with(cache);
    let key = doc_key(1);

    global_set(&ctx, &key, b"payload".to_vec()).await.unwrap();
    assert_eq!(
        global_get(&ctx, &key).await.unwrap(),
        Some(b"payload".to_vec())
    );

    lock_for_write(&ctx, &key).await.unwrap();
    assert_eq!(global_get(&ctx, &key).await.unwrap(), None);
}

#[tokio::test]
async fn test_unlock_swaps_sentinel_for_empty_value() {
    let cache = Arc::new(InProcessGlobalCache::new());
    let ctx = context_with(cache.clone());
    let key = doc_key(1);

    lock_for_write(&ctx, &key).await.unwrap();
    unlock_for_write(&ctx, &key).await.unwrap();

    let raw = cache
        .get(vec![global_cache_key(&key)])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(raw.as_deref(), Some(&[][..]));
}

#[tokio::test]
async fn test_entity_payload_round_trips_through_global_cache() {
    use quarry::entity::{entity_from_wire, entity_to_wire, wire_entity_bytes, wire_entity_from_bytes};
    use quarry::types::Value;
    use quarry::Entity;
    use std::collections::BTreeMap;

    let cache = Arc::new(InProcessGlobalCache::new());
    let ctx = context_with(cache);
    let key = doc_key(1);

    let mut properties = BTreeMap::new();
    properties.insert("name".to_string(), Value::Text("alpha".to_string()));
    let entity = Entity {
        key: key.clone(),
        properties,
        projection: None,
    };

    global_set(&ctx, &key, wire_entity_bytes(&entity_to_wire(&entity)))
        .await
        .unwrap();

    let payload = global_get(&ctx, &key).await.unwrap().unwrap();
    let decoded = wire_entity_from_bytes(&payload).unwrap();
    assert_eq!(entity_from_wire(&decoded), entity);
}

#[tokio::test]
async fn test_opted_out_kind_never_reaches_global_cache() {
    let mut config = ClientConfig::default();
    config.cache.policies.insert(
        "Doc".to_string(),
        CachePolicy {
            use_context_cache: true,
            use_global_cache: false,
            global_expiry_secs: None,
        },
    );

    let cache = Arc::new(InProcessGlobalCache::new());
    let ctx = Context::builder(Arc::new(NoopDatastore))
        .config(config)
        .global_cache(cache.clone())
        .build();
    let key = doc_key(1);

    global_set(&ctx, &key, b"payload".to_vec()).await.unwrap();
    assert_eq!(global_get(&ctx, &key).await.unwrap(), None);

    lock_for_write(&ctx, &key).await.unwrap();
    unlock_for_write(&ctx, &key).await.unwrap();

    // The backend never saw the key.
    let raw = cache
        .get(vec![global_cache_key(&key)])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(raw, None);
}

#[tokio::test]
async fn test_unlock_without_lock_is_noop() {
    let cache = Arc::new(InProcessGlobalCache::new());
    let ctx = context_with(cache);
    let key = doc_key(1);

    global_set(&ctx, &key, b"payload".to_vec()).await.unwrap();
    unlock_for_write(&ctx, &key).await.unwrap();

    // A value that is not the sentinel is left alone.
    assert_eq!(
        global_get(&ctx, &key).await.unwrap(),
        Some(b"payload".to_vec())
    );
}

/// Cache that relocks the watched key right after every watch, forcing
/// the interleaving where another writer takes the lock between the
/// unlocker's snapshot and its swap.
struct RelockOnWatch {
    inner: InProcessGlobalCache,
    armed: AtomicBool,
}

#[async_trait]
impl GlobalCache for RelockOnWatch {
    async fn get(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        self.inner.get(keys).await
    }

    async fn set(
        &self,
        items: Vec<(Vec<u8>, Vec<u8>)>,
        expires: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.inner.set(items, expires).await
    }

    async fn delete(&self, keys: Vec<Vec<u8>>) -> Result<(), CacheError> {
        self.inner.delete(keys).await
    }

    async fn watch(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Watch>, CacheError> {
        let watches = self.inner.watch(keys.clone()).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            let relocks = keys.into_iter().map(|key| (key, LOCKED.to_vec())).collect();
            self.inner.set(relocks, None).await?;
        }
        Ok(watches)
    }

    async fn compare_and_swap(
        &self,
        items: Vec<(Vec<u8>, CasToken, Vec<u8>)>,
        expires: Option<Duration>,
    ) -> Result<Vec<bool>, CacheError> {
        self.inner.compare_and_swap(items, expires).await
    }
}

#[tokio::test]
async fn test_relock_between_watch_and_swap_is_preserved() {
    let cache = Arc::new(RelockOnWatch {
        inner: InProcessGlobalCache::new(),
        armed: AtomicBool::new(false),
    });
    let ctx = context_with(cache.clone());
    let key = doc_key(1);

    lock_for_write(&ctx, &key).await.unwrap();

    // The unlocker's watch sees a lock, but a competing writer relocks
    // before the swap lands. Same bytes, newer token.
    cache.armed.store(true, Ordering::SeqCst);
    unlock_for_write(&ctx, &key).await.unwrap();

    let raw = cache
        .inner
        .get(vec![global_cache_key(&key)])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(raw.as_deref(), Some(LOCKED));
}
