//! Request coalescing for global cache operations.
//!
//! Calls issued during one scheduling tick against the same operation
//! class (and the same options) are collected into a single batch. The
//! first call creates the batch and schedules a flush to run after every
//! currently-ready task has had its turn; later calls in the same tick
//! join the batch. The flush performs one multi-key backend call and
//! resolves every joined waiter; a backend failure fails all of them
//! identically.
//!
//! A context without a configured global cache short-circuits: every
//! operation resolves immediately with an empty result.

use crate::cache::global::{CasToken, Watch};
use crate::context::Context;
use crate::error::CacheError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

type Bytes = Vec<u8>;
type Waiter<T> = oneshot::Sender<Result<T, CacheError>>;

/// Operation classes that batch separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BatchKind {
    Get,
    Set,
    Delete,
    Watch,
    CompareAndSwap,
}

/// Normalized options; calls with different options batch separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub(crate) struct BatchOptions {
    expires_ms: Option<u64>,
}

impl BatchOptions {
    fn from_expires(expires: Option<Duration>) -> Self {
        Self {
            expires_ms: expires.map(|ttl| ttl.as_millis() as u64),
        }
    }

    fn expires(&self) -> Option<Duration> {
        self.expires_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct BatchSlot {
    kind: BatchKind,
    options: BatchOptions,
}

/// Table of in-flight batches, owned by a context.
#[derive(Default)]
pub(crate) struct BatchTable {
    slots: HashMap<BatchSlot, Batch>,
}

enum Batch {
    Get {
        keys: Vec<Bytes>,
        waiters: HashMap<Bytes, Vec<Waiter<Option<Bytes>>>>,
    },
    Set {
        items: HashMap<Bytes, Bytes>,
        waiters: HashMap<Bytes, Vec<Waiter<()>>>,
    },
    Delete {
        keys: Vec<Bytes>,
        waiters: Vec<Waiter<()>>,
    },
    Watch {
        keys: Vec<Bytes>,
        waiters: HashMap<Bytes, Vec<Waiter<Watch>>>,
    },
    Cas {
        items: Vec<(Bytes, CasToken, Bytes)>,
        waiters: Vec<Waiter<bool>>,
    },
}

impl Batch {
    fn empty(kind: BatchKind) -> Self {
        match kind {
            BatchKind::Get => Batch::Get {
                keys: Vec::new(),
                waiters: HashMap::new(),
            },
            BatchKind::Set => Batch::Set {
                items: HashMap::new(),
                waiters: HashMap::new(),
            },
            BatchKind::Delete => Batch::Delete {
                keys: Vec::new(),
                waiters: Vec::new(),
            },
            BatchKind::Watch => Batch::Watch {
                keys: Vec::new(),
                waiters: HashMap::new(),
            },
            BatchKind::CompareAndSwap => Batch::Cas {
                items: Vec::new(),
                waiters: Vec::new(),
            },
        }
    }
}

/// Join (or create) the batch in `slot`, then schedule its flush if this
/// call created it.
fn enqueue(ctx: &Arc<Context>, slot: BatchSlot, join: impl FnOnce(&mut Batch)) {
    let created = {
        let mut table = ctx.batches().lock();
        let created = !table.slots.contains_key(&slot);
        let batch = table
            .slots
            .entry(slot.clone())
            .or_insert_with(|| Batch::empty(slot.kind));
        join(batch);
        created
    };

    if created {
        let ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            // Let every task that is already runnable add to the batch
            // before it fires.
            tokio::task::yield_now().await;
            flush(ctx, slot).await;
        });
    }
}

async fn recv<T>(rx: oneshot::Receiver<Result<T, CacheError>>) -> Result<T, CacheError> {
    rx.await
        .map_err(|_| CacheError::Backend("batch dropped before completion".to_string()))?
}

/// Batched single-key get.
pub async fn cache_get(ctx: &Arc<Context>, key: Bytes) -> Result<Option<Bytes>, CacheError> {
    if ctx.global_cache().is_none() {
        return Ok(None);
    }
    let (tx, rx) = oneshot::channel();
    enqueue(
        ctx,
        BatchSlot {
            kind: BatchKind::Get,
            options: BatchOptions::default(),
        },
        |batch| {
            if let Batch::Get { keys, waiters } = batch {
                let entry = waiters.entry(key.clone()).or_default();
                if entry.is_empty() {
                    keys.push(key);
                }
                entry.push(tx);
            }
        },
    );
    recv(rx).await
}

/// Batched single-key set.
pub async fn cache_set(
    ctx: &Arc<Context>,
    key: Bytes,
    value: Bytes,
    expires: Option<Duration>,
) -> Result<(), CacheError> {
    if ctx.global_cache().is_none() {
        return Ok(());
    }
    let (tx, rx) = oneshot::channel();
    enqueue(
        ctx,
        BatchSlot {
            kind: BatchKind::Set,
            options: BatchOptions::from_expires(expires),
        },
        |batch| {
            if let Batch::Set { items, waiters } = batch {
                match items.get(&key) {
                    Some(existing) if *existing != value => {
                        // Two different values for one key in one tick is
                        // a caller bug; fail just this waiter.
                        let _ = tx.send(Err(CacheError::ConflictingBatchValue(format!(
                            "{:?}",
                            key
                        ))));
                    }
                    _ => {
                        items.insert(key.clone(), value);
                        waiters.entry(key).or_default().push(tx);
                    }
                }
            }
        },
    );
    recv(rx).await
}

/// Batched single-key delete.
pub async fn cache_delete(ctx: &Arc<Context>, key: Bytes) -> Result<(), CacheError> {
    if ctx.global_cache().is_none() {
        return Ok(());
    }
    let (tx, rx) = oneshot::channel();
    enqueue(
        ctx,
        BatchSlot {
            kind: BatchKind::Delete,
            options: BatchOptions::default(),
        },
        |batch| {
            if let Batch::Delete { keys, waiters } = batch {
                keys.push(key);
                waiters.push(tx);
            }
        },
    );
    recv(rx).await
}

/// Batched single-key watch (optimistic transaction start).
pub async fn cache_watch(ctx: &Arc<Context>, key: Bytes) -> Result<Watch, CacheError> {
    if ctx.global_cache().is_none() {
        return Ok(Watch {
            value: None,
            token: CasToken::ABSENT,
        });
    }
    let (tx, rx) = oneshot::channel();
    enqueue(
        ctx,
        BatchSlot {
            kind: BatchKind::Watch,
            options: BatchOptions::default(),
        },
        |batch| {
            if let Batch::Watch { keys, waiters } = batch {
                let entry = waiters.entry(key.clone()).or_default();
                if entry.is_empty() {
                    keys.push(key);
                }
                entry.push(tx);
            }
        },
    );
    recv(rx).await
}

/// Batched single-key compare-and-swap. Returns whether the swap
/// committed. Resolves to `false` when no global cache is configured.
pub async fn cache_compare_and_swap(
    ctx: &Arc<Context>,
    key: Bytes,
    token: CasToken,
    value: Bytes,
    expires: Option<Duration>,
) -> Result<bool, CacheError> {
    if ctx.global_cache().is_none() {
        return Ok(false);
    }
    let (tx, rx) = oneshot::channel();
    enqueue(
        ctx,
        BatchSlot {
            kind: BatchKind::CompareAndSwap,
            options: BatchOptions::from_expires(expires),
        },
        |batch| {
            if let Batch::Cas { items, waiters } = batch {
                items.push((key, token, value));
                waiters.push(tx);
            }
        },
    );
    recv(rx).await
}

async fn flush(ctx: Arc<Context>, slot: BatchSlot) {
    let Some(batch) = ctx.batches().lock().slots.remove(&slot) else {
        return;
    };
    let Some(cache) = ctx.global_cache() else {
        return;
    };

    match batch {
        Batch::Get { keys, mut waiters } => {
            trace!(keys = keys.len(), "flushing cache get batch");
            match cache.get(keys.clone()).await {
                Ok(values) => {
                    for (key, value) in keys.into_iter().zip(values) {
                        for waiter in waiters.remove(&key).unwrap_or_default() {
                            // Receiver may have gone away; ignore.
                            let _ = waiter.send(Ok(value.clone()));
                        }
                    }
                }
                Err(error) => fail_keyed(waiters, error),
            }
        }
        Batch::Set { items, mut waiters } => {
            let expires = slot.options.expires();
            let keys: Vec<Bytes> = items.keys().cloned().collect();
            trace!(items = keys.len(), "flushing cache set batch");
            match cache.set(items.into_iter().collect(), expires).await {
                Ok(()) => {
                    for key in keys {
                        for waiter in waiters.remove(&key).unwrap_or_default() {
                            let _ = waiter.send(Ok(()));
                        }
                    }
                }
                Err(error) => fail_keyed(waiters, error),
            }
        }
        Batch::Delete { keys, waiters } => {
            trace!(keys = keys.len(), "flushing cache delete batch");
            let outcome = cache.delete(keys).await;
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
        Batch::Watch { keys, mut waiters } => {
            trace!(keys = keys.len(), "flushing cache watch batch");
            match cache.watch(keys.clone()).await {
                Ok(watches) => {
                    for (key, watch) in keys.into_iter().zip(watches) {
                        for waiter in waiters.remove(&key).unwrap_or_default() {
                            let _ = waiter.send(Ok(watch.clone()));
                        }
                    }
                }
                Err(error) => fail_keyed(waiters, error),
            }
        }
        Batch::Cas { items, waiters } => {
            let expires = slot.options.expires();
            trace!(items = items.len(), "flushing cache compare-and-swap batch");
            match cache.compare_and_swap(items, expires).await {
                Ok(outcomes) => {
                    for (waiter, outcome) in waiters.into_iter().zip(outcomes) {
                        let _ = waiter.send(Ok(outcome));
                    }
                }
                Err(error) => {
                    debug!(%error, "compare-and-swap batch failed");
                    for waiter in waiters {
                        let _ = waiter.send(Err(error.clone()));
                    }
                }
            }
        }
    }
}

fn fail_keyed<T>(waiters: HashMap<Bytes, Vec<Waiter<T>>>, error: CacheError) {
    debug!(%error, "cache batch failed; failing all joined waiters");
    for (_, key_waiters) in waiters {
        for waiter in key_waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}
