//! Execution context: the ambient state a query or cache call runs under.
//!
//! A context carries the client configuration, the RPC transport, the
//! optional global cache backend, the current transaction (if any), the
//! per-context entity cache, and the table of in-flight cache batches.
//! Transactions run in a child context whose cache commits into the
//! parent's on success.

use crate::cache::batch::BatchTable;
use crate::cache::{ContextCache, GlobalCache};
use crate::config::{CachePolicy, ClientConfig};
use crate::datastore::{DatastoreRpc, SharedDatastore};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct Context {
    config: ClientConfig,
    datastore: SharedDatastore,
    global_cache: Option<Arc<dyn GlobalCache>>,
    transaction: Option<Vec<u8>>,
    cache: Mutex<ContextCache>,
    batches: Mutex<BatchTable>,
    parent: Option<Arc<Context>>,
}

impl Context {
    pub fn builder(datastore: SharedDatastore) -> ContextBuilder {
        ContextBuilder {
            config: ClientConfig::default(),
            datastore,
            global_cache: None,
            transaction: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn datastore(&self) -> &dyn DatastoreRpc {
        self.datastore.as_ref()
    }

    pub fn transaction(&self) -> Option<&[u8]> {
        self.transaction.as_deref()
    }

    pub fn global_cache(&self) -> Option<Arc<dyn GlobalCache>> {
        self.global_cache.clone()
    }

    /// The per-context entity cache.
    pub fn cache(&self) -> &Mutex<ContextCache> {
        &self.cache
    }

    pub(crate) fn batches(&self) -> &Mutex<BatchTable> {
        &self.batches
    }

    /// Cache applicability for an entity kind, resolved from config.
    pub fn policy_for(&self, kind: &str) -> &CachePolicy {
        self.config.cache.policy_for(kind)
    }

    /// Start a child context for a transaction. The child sees its own
    /// cache; batches are per-context and never cross the boundary.
    pub fn new_child(self: &Arc<Self>, transaction: Option<Vec<u8>>) -> Arc<Context> {
        Arc::new(Context {
            config: self.config.clone(),
            datastore: Arc::clone(&self.datastore),
            global_cache: self.global_cache.clone(),
            transaction,
            cache: Mutex::new(ContextCache::new()),
            batches: Mutex::new(BatchTable::default()),
            parent: Some(Arc::clone(self)),
        })
    }

    /// Commit this child's cached entities into its parent. Entries
    /// written in the child overwrite the parent's (last writer wins).
    /// A context without a parent keeps its cache as is.
    pub fn commit_cache_to_parent(&self) {
        if let Some(parent) = &self.parent {
            let drained = std::mem::take(&mut *self.cache.lock());
            parent.cache.lock().absorb(drained);
        }
    }
}

pub struct ContextBuilder {
    config: ClientConfig,
    datastore: SharedDatastore,
    global_cache: Option<Arc<dyn GlobalCache>>,
    transaction: Option<Vec<u8>>,
}

impl ContextBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn global_cache(mut self, cache: Arc<dyn GlobalCache>) -> Self {
        self.global_cache = Some(cache);
        self
    }

    pub fn transaction(mut self, transaction: Vec<u8>) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn build(self) -> Arc<Context> {
        Arc::new(Context {
            config: self.config,
            datastore: self.datastore,
            global_cache: self.global_cache,
            transaction: self.transaction,
            cache: Mutex::new(ContextCache::new()),
            batches: Mutex::new(BatchTable::default()),
            parent: None,
        })
    }
}
