//! Wire protocol structures for the remote document store RPC.
//!
//! These mirror the shapes the RPC collaborator sends and receives. The
//! transport itself is external; this module only defines the request and
//! response payloads the query translator produces and the iterators
//! consume.

use crate::key::Key;
use crate::types::{Direction, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Comparison operators the wire filter grammar supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireOp {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    HasAncestor,
}

/// A single property comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property: String,
    pub op: WireOp,
    pub value: Value,
}

/// A filter tree node. Composite filters are AND-only at the wire level;
/// disjunctions must be decomposed client-side before translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireFilter {
    Property(PropertyFilter),
    CompositeAnd(Vec<WireFilter>),
}

/// One element of the wire ordering list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireOrder {
    pub property: String,
    pub direction: Direction,
}

/// A fully-translated query, ready to send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireQuery {
    pub kind: Option<String>,
    pub projection: Vec<String>,
    pub distinct_on: Vec<String>,
    pub order: Vec<WireOrder>,
    pub filter: Option<WireFilter>,
    pub start_cursor: Option<Vec<u8>>,
    pub end_cursor: Option<Vec<u8>>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

/// Entity payload as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEntity {
    pub key: Key,
    pub properties: BTreeMap<String, Value>,
}

/// How much of each entity a batch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    Full,
    KeyOnly,
    Projection,
}

/// One result record in a batch: the entity payload plus the cursor
/// position just after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResult {
    pub entity: WireEntity,
    pub cursor: Vec<u8>,
}

/// Continuation state reported with each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoreResults {
    NotFinished,
    MoreResultsAfterLimit,
    NoMoreResults,
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBatch {
    pub entity_result_type: ResultKind,
    pub entity_results: Vec<EntityResult>,
    pub more_results: MoreResults,
    pub end_cursor: Vec<u8>,
    pub skipped_results: u32,
}

/// Read options forwarded with every query; carries the transaction
/// handle when one is active.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadOptions {
    pub transaction: Option<Vec<u8>>,
}

/// The run-query RPC request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQueryRequest {
    pub project: String,
    pub namespace: Option<String>,
    pub query: WireQuery,
    pub read_options: ReadOptions,
}

/// The run-query RPC response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQueryResponse {
    pub batch: QueryBatch,
}
