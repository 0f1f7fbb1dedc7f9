//! Client configuration.
//!
//! Layered configuration for the query and caching layer: built-in
//! defaults, an optional TOML file, then `QUARRY_*` environment variable
//! overrides. Cache applicability is configured per entity kind here and
//! resolved once at context construction.

use crate::error::QueryError;
use crate::logging::LoggingConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Cache applicability for one entity kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Use the per-context in-memory cache for this kind.
    #[serde(default = "default_true")]
    pub use_context_cache: bool,

    /// Use the shared/global cache for this kind.
    #[serde(default = "default_true")]
    pub use_global_cache: bool,

    /// Seconds until a global cache entry for this kind expires.
    #[serde(default)]
    pub global_expiry_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            use_context_cache: true,
            use_global_cache: true,
            global_expiry_secs: None,
        }
    }
}

/// Cache configuration: a default policy plus per-kind overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub default_policy: CachePolicy,

    /// Per-kind policy overrides, keyed by entity kind name.
    #[serde(default)]
    pub policies: HashMap<String, CachePolicy>,
}

impl CacheConfig {
    /// Resolve the policy for an entity kind.
    pub fn policy_for(&self, kind: &str) -> &CachePolicy {
        self.policies.get(kind).unwrap_or(&self.default_policy)
    }
}

/// Root client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Project the queries run against.
    #[serde(default = "default_project")]
    pub project: String,

    /// Default namespace, if any.
    #[serde(default)]
    pub namespace: Option<String>,

    /// The backend is an emulator with incomplete continuation semantics;
    /// forces brute-force counting.
    #[serde(default)]
    pub emulated_backend: bool,

    /// Retry policy for RPC calls.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Cache applicability configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_project() -> String {
    "default".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            namespace: None,
            emulated_backend: false,
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from an optional file with environment overrides.
    ///
    /// Priority order (highest to lowest):
    /// 1. `QUARRY_*` environment variables (e.g. `QUARRY_PROJECT`)
    /// 2. Configuration file
    /// 3. Defaults
    pub fn load(file: Option<&Path>) -> Result<Self, QueryError> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("QUARRY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        // An entirely empty source set deserializes into the defaults.
        let loaded: ClientConfig = settings.try_deserialize()?;
        Ok(loaded)
    }
}
