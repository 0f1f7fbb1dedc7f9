//! A single query result, sortable by the query's ordering.
//!
//! Results keep their raw wire record alongside the ordering they were
//! produced under so that the disjunction merge can compare results from
//! different sub-queries without rematerializing entities.

use crate::cache::CacheLookup;
use crate::context::Context;
use crate::cursor::Cursor;
use crate::entity::{entity_from_wire, Entity};
use crate::error::QueryError;
use crate::key::Key;
use crate::types::{PropertyOrder, KEY_PROPERTY};
use crate::wire::{EntityResult, ResultKind};
use std::cmp::Ordering;

/// What the caller gets for one result: a typed entity, or just its key
/// for key-only queries.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultItem {
    Entity(Entity),
    Key(Key),
}

impl ResultItem {
    pub fn key(&self) -> &Key {
        match self {
            ResultItem::Entity(entity) => &entity.key,
            ResultItem::Key(key) => key,
        }
    }
}

/// One raw result with the context needed to order and materialize it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub kind: ResultKind,
    pub record: EntityResult,
    pub order_by: Vec<PropertyOrder>,
}

impl RawResult {
    pub fn new(kind: ResultKind, record: EntityResult, order_by: Vec<PropertyOrder>) -> Self {
        Self {
            kind,
            record,
            order_by,
        }
    }

    pub fn key(&self) -> &Key {
        &self.record.entity.key
    }

    /// The continuation cursor positioned just after this result.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.record.cursor.clone())
    }

    /// Order two results by the shared ordering specification.
    ///
    /// Results can only be compared when the query carries an explicit
    /// ordering; without one there is no total order across sub-queries.
    pub fn compare(&self, other: &RawResult) -> Result<Ordering, QueryError> {
        if self.order_by.is_empty() {
            return Err(QueryError::NotSortable);
        }

        for order in &self.order_by {
            let ordering = if order.name == KEY_PROPERTY {
                self.key().flat_path().cmp(&other.key().flat_path())
            } else {
                let a = self.record.entity.properties.get(&order.name);
                let b = other.record.entity.properties.get(&order.name);
                match (a, b) {
                    (Some(a), Some(b)) => a.compare(b),
                    // Absent sorts before present, matching index order.
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            };

            let ordering = if order.reverse() {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return Ok(ordering);
            }
        }

        Ok(Ordering::Equal)
    }

    /// Whether the context cache says this identity is known deleted.
    pub fn is_tombstoned(&self, ctx: &Context) -> bool {
        if !ctx.policy_for(self.key().kind()).use_context_cache {
            return false;
        }
        matches!(
            ctx.cache().lock().get_and_validate(self.key()),
            CacheLookup::Hit(None)
        )
    }

    /// Materialize the caller-facing item for this result.
    ///
    /// Full results consult and populate the context cache under the
    /// kind's policy. Projection results are tagged with the property
    /// names actually present. Key-only results carry just the key.
    pub fn materialize(&self, ctx: &Context) -> ResultItem {
        match self.kind {
            ResultKind::KeyOnly => ResultItem::Key(self.record.entity.key.clone()),
            ResultKind::Projection => {
                let mut entity = entity_from_wire(&self.record.entity);
                entity.projection = Some(
                    self.record
                        .entity
                        .properties
                        .keys()
                        .cloned()
                        .collect(),
                );
                ResultItem::Entity(entity)
            }
            ResultKind::Full => {
                let key = self.key();
                if ctx.policy_for(key.kind()).use_context_cache {
                    let mut cache = ctx.cache().lock();
                    if let CacheLookup::Hit(Some(cached)) = cache.get_and_validate(key) {
                        return ResultItem::Entity(cached);
                    }
                    let entity = entity_from_wire(&self.record.entity);
                    cache.set(key.clone(), entity.clone());
                    ResultItem::Entity(entity)
                } else {
                    ResultItem::Entity(entity_from_wire(&self.record.entity))
                }
            }
        }
    }

    /// Drop properties that were added to the projection only to make
    /// the result sortable; callers never see them.
    pub fn strip_extra_projections(&mut self, wanted: &[String]) {
        if self.kind != ResultKind::Projection {
            return;
        }
        self.record
            .entity
            .properties
            .retain(|name, _| wanted.iter().any(|p| p == name));
    }

    /// Coerce a projection on `__key__` alone into a key-only result.
    pub fn coerce_key_only(&mut self) {
        if self.kind == ResultKind::Projection && self.record.entity.properties.is_empty() {
            self.kind = ResultKind::KeyOnly;
        }
    }
}
