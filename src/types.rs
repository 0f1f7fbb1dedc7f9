//! Property values and sort specifications shared across the query layer.

use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single property value as stored in the remote document store.
///
/// Values of different types have a well-defined relative order (the type
/// rank below), matching the backend's index ordering, so that client-side
/// merges agree with server-side sorts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(i64),
    Text(String),
    Blob(Vec<u8>),
    Key(Key),
}

impl Value {
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Timestamp(_) => 3,
            Value::Text(_) => 4,
            Value::Blob(_) => 5,
            Value::Key(_) => 6,
        }
    }

    /// Total order over values, for sorting and filter evaluation.
    ///
    /// Integers and floats share a rank and compare numerically. Keys
    /// compare by flattened ancestor path.
    pub fn compare(&self, other: &Value) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Key(a), Value::Key(b)) => a.flat_path().cmp(&b.flat_path()),
            // Unreachable: ranks matched above.
            _ => Ordering::Equal,
        }
    }
}

/// Sort direction for a property ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One element of a query's ordering specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyOrder {
    pub name: String,
    pub direction: Direction,
}

impl PropertyOrder {
    pub fn ascending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: Direction::Ascending,
        }
    }

    pub fn descending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: Direction::Descending,
        }
    }

    pub fn reverse(&self) -> bool {
        self.direction == Direction::Descending
    }
}

/// Pseudo-property name addressing the entity identity in orderings,
/// projections, and ancestor filters.
pub const KEY_PROPERTY: &str = "__key__";
