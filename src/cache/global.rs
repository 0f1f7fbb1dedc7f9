//! The shared (global) cache backend seam.
//!
//! A global cache is shared across contexts and possibly across servers.
//! Mutation of contended keys goes through `watch`/`compare_and_swap`:
//! `watch` snapshots a value together with an opaque per-key token, and
//! `compare_and_swap` commits only if the key's token is unchanged. This
//! maps directly onto memcached's gets/cas pair and Redis WATCH/MULTI.

use crate::error::CacheError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Opaque optimistic-concurrency token for one key.
///
/// Tokens are never reused; a fresh write always produces a new token.
/// The zero token denotes an absent key, so a compare-and-swap against it
/// is a set-if-not-exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CasToken(pub u64);

impl CasToken {
    pub const ABSENT: CasToken = CasToken(0);
}

/// Result of watching one key: the value snapshot and its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub value: Option<Vec<u8>>,
    pub token: CasToken,
}

/// Shared cache backend operations, all batched by the coordinator.
#[async_trait]
pub trait GlobalCache: Send + Sync {
    /// Retrieve values for keys; `None` per missing key.
    async fn get(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Option<Vec<u8>>>, CacheError>;

    /// Store values, optionally expiring.
    async fn set(
        &self,
        items: Vec<(Vec<u8>, Vec<u8>)>,
        expires: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Remove keys.
    async fn delete(&self, keys: Vec<Vec<u8>>) -> Result<(), CacheError>;

    /// Snapshot values and tokens for an optimistic transaction.
    async fn watch(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Watch>, CacheError>;

    /// Commit values only for keys whose token is unchanged; reports
    /// per-item success.
    async fn compare_and_swap(
        &self,
        items: Vec<(Vec<u8>, CasToken, Vec<u8>)>,
        expires: Option<Duration>,
    ) -> Result<Vec<bool>, CacheError>;
}

struct Entry {
    value: Vec<u8>,
    token: CasToken,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

/// In-process reference implementation of [`GlobalCache`].
///
/// Intended for tests and single-process deployments. Tokens come from a
/// monotonic counter, so a relock that writes the same byte value still
/// invalidates an older watch.
pub struct InProcessGlobalCache {
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
    next_token: AtomicU64,
}

impl Default for InProcessGlobalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessGlobalCache {
    // Tokens start at 1; zero is reserved for the absent sentinel.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    fn mint_token(&self) -> CasToken {
        CasToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn expiry(expires: Option<Duration>) -> Option<Instant> {
        expires.map(|ttl| Instant::now() + ttl)
    }
}

#[async_trait]
impl GlobalCache for InProcessGlobalCache {
    async fn get(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|key| {
                entries
                    .get(key)
                    .filter(|entry| entry.live(now))
                    .map(|entry| entry.value.clone())
            })
            .collect())
    }

    async fn set(
        &self,
        items: Vec<(Vec<u8>, Vec<u8>)>,
        expires: Option<Duration>,
    ) -> Result<(), CacheError> {
        let expires_at = Self::expiry(expires);
        let mut entries = self.entries.lock();
        for (key, value) in items {
            let token = self.mint_token();
            entries.insert(
                key,
                Entry {
                    value,
                    token,
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, keys: Vec<Vec<u8>>) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(&key);
        }
        Ok(())
    }

    async fn watch(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Watch>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|key| match entries.get(key).filter(|entry| entry.live(now)) {
                Some(entry) => Watch {
                    value: Some(entry.value.clone()),
                    token: entry.token,
                },
                None => Watch {
                    value: None,
                    token: CasToken::ABSENT,
                },
            })
            .collect())
    }

    async fn compare_and_swap(
        &self,
        items: Vec<(Vec<u8>, CasToken, Vec<u8>)>,
        expires: Option<Duration>,
    ) -> Result<Vec<bool>, CacheError> {
        let now = Instant::now();
        let expires_at = Self::expiry(expires);
        let mut entries = self.entries.lock();
        let mut outcomes = Vec::with_capacity(items.len());

        for (key, expected, value) in items {
            let current = entries
                .get(&key)
                .filter(|entry| entry.live(now))
                .map(|entry| entry.token)
                .unwrap_or(CasToken::ABSENT);

            if current == expected {
                let token = self.mint_token();
                entries.insert(
                    key,
                    Entry {
                        value,
                        token,
                        expires_at,
                    },
                );
                outcomes.push(true);
            } else {
                outcomes.push(false);
            }
        }

        Ok(outcomes)
    }
}
