//! Quarry: Client-Side Query Execution and Caching
//!
//! A query execution and caching layer over a remote document store:
//! declarative query specs translated to wire queries, paginated and
//! merged result iteration, and a two-level entity cache with batched
//! access to a shared backend.

pub mod cache;
pub mod config;
pub mod context;
pub mod cursor;
pub mod datastore;
pub mod entity;
pub mod error;
pub mod key;
pub mod logging;
pub mod query;
pub mod retry;
pub mod types;
pub mod wire;

pub use context::Context;
pub use cursor::Cursor;
pub use entity::Entity;
pub use error::{CacheError, QueryError, RpcError};
pub use key::{Id, Key};
pub use query::driver::{count, fetch};
pub use query::iterator::{iterate, QueryIterator};
pub use query::result::ResultItem;
pub use query::{FilterNode, PropertyOp, QuerySpec};
