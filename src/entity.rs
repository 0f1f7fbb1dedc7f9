//! In-memory entity representation and wire mapping.
//!
//! The schema/property marshaling collaborator is external; the mapping
//! here is the minimal identity-preserving translation the query layer
//! needs in order to hand typed entities to callers and serialize cache
//! values.

use crate::key::Key;
use crate::types::Value;
use crate::wire::WireEntity;
use std::collections::BTreeMap;

/// A materialized entity.
///
/// `projection` is `Some` when the entity came back from a projection
/// query, naming the properties actually present.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: Key,
    pub properties: BTreeMap<String, Value>,
    pub projection: Option<Vec<String>>,
}

impl Entity {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// Materialize an entity from its wire form.
pub fn entity_from_wire(wire: &WireEntity) -> Entity {
    Entity {
        key: wire.key.clone(),
        properties: wire.properties.clone(),
        projection: None,
    }
}

/// Serialize an entity back to its wire form.
pub fn entity_to_wire(entity: &Entity) -> WireEntity {
    WireEntity {
        key: entity.key.clone(),
        properties: entity.properties.clone(),
    }
}

/// Canonical byte encoding of a wire entity, used for global cache values.
pub fn wire_entity_bytes(wire: &WireEntity) -> Vec<u8> {
    bincode::serialize(wire).unwrap_or_default()
}

/// Decode a global cache value back into a wire entity.
pub fn wire_entity_from_bytes(bytes: &[u8]) -> Option<WireEntity> {
    bincode::deserialize(bytes).ok()
}
