//! Opaque query cursors.
//!
//! A cursor is a position token minted by the remote store. The bytes have
//! no client-visible structure; this wrapper only adds equality, hashing,
//! and a URL-safe text encoding so cursors can travel in request URLs.

use crate::error::QueryError;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    bytes: Vec<u8>,
}

impl Cursor {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Decode a cursor from its URL-safe text form.
    pub fn from_websafe_string(websafe: &str) -> Result<Self, QueryError> {
        let bytes = URL_SAFE
            .decode(websafe)
            .map_err(|e| QueryError::BadCursor(e.to_string()))?;
        Ok(Self { bytes })
    }

    /// Encode this cursor to its URL-safe text form.
    pub fn to_websafe_string(&self) -> String {
        URL_SAFE.encode(&self.bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
