//! Error types for the query and caching layer.

use thiserror::Error;

/// Errors from the RPC collaborator or the retry layer wrapping it.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend error {code}: {message}")]
    Backend { code: u32, message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<RpcError>,
    },
}

impl RpcError {
    /// Whether this error may succeed on retry.
    ///
    /// Transport failures and timeouts are transient; backend errors carry
    /// a status code and only the conventional unavailable/deadline codes
    /// are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transport(_) | RpcError::Timeout(_) => true,
            RpcError::Backend { code, .. } => matches!(code, 4 | 14),
            RpcError::RetriesExhausted { .. } => false,
        }
    }
}

/// Errors from the shared (global) cache backend or batch coordinator.
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Key set twice with different values in one batch: {0}")]
    ConflictingBatchValue(String),
}

/// Errors surfaced to query callers.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No cursor is defined at the current iterator position.
    #[error("There is no cursor currently")]
    NoCursor,

    /// Merged multi-source streams have no single cursor position.
    #[error("Can't have cursors with OR filter")]
    CursorUnsupported,

    /// Comparison requested on a result set without an ordering.
    #[error("Can't sort result set without order_by")]
    NotSortable,

    /// A websafe cursor string that does not decode.
    #[error("Malformed cursor: {0}")]
    BadCursor(String),

    /// A filter combination the wire grammar cannot express and the
    /// client does not decompose. Indicates a caller error.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl From<config::ConfigError> for QueryError {
    fn from(err: config::ConfigError) -> Self {
        QueryError::Config(err.to_string())
    }
}
