//! Two-level caching for entities keyed by identity.
//!
//! The context cache is a per-context, in-memory map that also records
//! tombstones for deletions. The global cache is a shared backend behind
//! the [`global::GlobalCache`] trait, reached through the batching
//! coordinator in [`batch`], with a lock protocol that keeps concurrent
//! writers from resurrecting stale values.

pub mod batch;
pub mod global;

pub use global::{CasToken, GlobalCache, InProcessGlobalCache, Watch};

use crate::context::Context;
use crate::entity::Entity;
use crate::error::CacheError;
use crate::key::Key;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Sentinel value marking a key as locked for write.
pub const LOCKED: &[u8] = b"0";

/// How long a write lock (and the unlock tombstone) lives.
pub const LOCK_TIME: Duration = Duration::from_secs(32);

/// Versioned prefix for global cache keys; bump when the value encoding
/// changes so stale deployments never decode each other's entries.
pub const CACHE_KEY_PREFIX: &str = "QRY1";

/// Whether a raw cache value is the write-lock sentinel.
pub fn is_locked_value(value: &[u8]) -> bool {
    value == LOCKED
}

/// The global cache key for an entity identity:
/// `[namespace ':'] prefix ':' urlsafe(identity)`.
pub fn global_cache_key(key: &Key) -> Vec<u8> {
    let mut out = String::new();
    if let Some(namespace) = &key.namespace {
        out.push_str(namespace);
        out.push(':');
    }
    out.push_str(CACHE_KEY_PREFIX);
    out.push(':');
    out.push_str(&key.urlsafe());
    out.into_bytes()
}

/// Outcome of a context cache probe.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// The identity is cached; `None` is a tombstone (known deleted).
    Hit(Option<Entity>),
    Miss,
}

/// Per-context entity cache with tombstones.
///
/// An entry whose stored identity no longer matches the probe key is
/// evicted on read rather than served; entries are only trusted when
/// identity-consistent.
#[derive(Debug, Default)]
pub struct ContextCache {
    entries: HashMap<Key, Option<Entity>>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe for `key`, validating that a cached entity still carries the
    /// identity it is filed under.
    pub fn get_and_validate(&mut self, key: &Key) -> CacheLookup {
        match self.entries.get(key) {
            None => CacheLookup::Miss,
            Some(None) => CacheLookup::Hit(None),
            Some(Some(entity)) => {
                if entity.key == *key {
                    CacheLookup::Hit(Some(entity.clone()))
                } else {
                    debug!(kind = key.kind(), "evicting identity-inconsistent cache entry");
                    self.entries.remove(key);
                    CacheLookup::Miss
                }
            }
        }
    }

    pub fn set(&mut self, key: Key, entity: Entity) {
        self.entries.insert(key, Some(entity));
    }

    /// Record that the identity is known deleted.
    pub fn set_tombstone(&mut self, key: Key) {
        self.entries.insert(key, None);
    }

    pub fn remove(&mut self, key: &Key) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold another cache's entries into this one; the other side wins on
    /// conflicts. Used when a child context commits into its parent.
    pub fn absorb(&mut self, other: ContextCache) {
        self.entries.extend(other.entries);
    }
}

/// Whether the kind's policy admits this identity to the global cache.
fn global_cache_applies(ctx: &Context, key: &Key) -> bool {
    ctx.policy_for(key.kind()).use_global_cache
}

/// Read one serialized entity from the global cache. A lock sentinel
/// reads as absent. Kinds whose policy opts out of the global cache
/// always miss.
pub async fn global_get(ctx: &Arc<Context>, key: &Key) -> Result<Option<Vec<u8>>, CacheError> {
    if !global_cache_applies(ctx, key) {
        return Ok(None);
    }
    let value = batch::cache_get(ctx, global_cache_key(key)).await?;
    Ok(value.filter(|value| !is_locked_value(value)))
}

/// Write one serialized entity to the global cache, expiring per the
/// kind's cache policy. A no-op for kinds whose policy opts out.
pub async fn global_set(ctx: &Arc<Context>, key: &Key, value: Vec<u8>) -> Result<(), CacheError> {
    if !global_cache_applies(ctx, key) {
        return Ok(());
    }
    let expires = ctx
        .config()
        .cache
        .policy_for(key.kind())
        .global_expiry_secs
        .map(Duration::from_secs);
    batch::cache_set(ctx, global_cache_key(key), value, expires).await
}

/// Remove one identity from the global cache.
pub async fn global_delete(ctx: &Arc<Context>, key: &Key) -> Result<(), CacheError> {
    if !global_cache_applies(ctx, key) {
        return Ok(());
    }
    batch::cache_delete(ctx, global_cache_key(key)).await
}

/// Mark an identity locked for write so concurrent readers do not
/// repopulate it with a value that is about to go stale. The lock
/// expires on its own if the writer dies.
pub async fn lock_for_write(ctx: &Arc<Context>, key: &Key) -> Result<(), CacheError> {
    if !global_cache_applies(ctx, key) {
        return Ok(());
    }
    batch::cache_set(ctx, global_cache_key(key), LOCKED.to_vec(), Some(LOCK_TIME)).await
}

/// Release a write lock.
///
/// Watches the key first and swaps the sentinel for an empty value only
/// if it is still the lock this writer observed. A concurrent relock
/// between the watch and the swap makes the swap a no-op, leaving the
/// newer lock in place.
pub async fn unlock_for_write(ctx: &Arc<Context>, key: &Key) -> Result<(), CacheError> {
    if !global_cache_applies(ctx, key) {
        return Ok(());
    }
    let cache_key = global_cache_key(key);
    let watch = batch::cache_watch(ctx, cache_key.clone()).await?;
    match watch.value {
        Some(value) if is_locked_value(&value) => {
            let swapped = batch::cache_compare_and_swap(
                ctx,
                cache_key,
                watch.token,
                Vec::new(),
                Some(LOCK_TIME),
            )
            .await?;
            if !swapped {
                debug!(kind = key.kind(), "lock retaken during unlock; leaving it");
            }
            Ok(())
        }
        // Already expired, cleared, or overwritten.
        _ => Ok(()),
    }
}
