//! Entity identity: a path of (kind, id) pairs, optionally namespaced.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Numeric or named identifier for one path element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Id {
    IntId(i64),
    Name(String),
}

/// One (kind, id) step in an identity path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: String,
    pub id: Id,
}

/// The unique path-based address of a stored entity.
///
/// The last path element names the entity itself; preceding elements are
/// its ancestors. Two keys are the same identity iff their namespace and
/// full path match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub namespace: Option<String>,
    pub path: Vec<PathElement>,
}

impl Key {
    pub fn new(kind: &str, id: Id) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement {
                kind: kind.to_string(),
                id,
            }],
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Nest a new (kind, id) element under this key as its parent.
    pub fn child(&self, kind: &str, id: Id) -> Self {
        let mut path = self.path.clone();
        path.push(PathElement {
            kind: kind.to_string(),
            id,
        });
        Self {
            namespace: self.namespace.clone(),
            path,
        }
    }

    /// Kind of the entity the key addresses (the last path element).
    pub fn kind(&self) -> &str {
        self.path
            .last()
            .map(|element| element.kind.as_str())
            .unwrap_or("")
    }

    /// The path flattened to an alternating kind/id sequence, used for
    /// ordering keys the way the backend's `__key__` index does.
    pub fn flat_path(&self) -> Vec<(String, Id)> {
        self.path
            .iter()
            .map(|element| (element.kind.clone(), element.id.clone()))
            .collect()
    }

    /// Canonical byte encoding of the identity.
    ///
    /// Stable across processes; used for dedup hashing and cache keys.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serialization of a plain enum/struct tree cannot fail.
        bincode::serialize(self).unwrap_or_default()
    }

    /// URL-safe text encoding of the identity.
    pub fn urlsafe(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }
}
