//! Declarative query specifications.
//!
//! A [`QuerySpec`] is an immutable description of a query: filters,
//! ordering, projection, ancestor constraint, limit/offset, and cursors.
//! Every transformation derives a new spec; iterators never mutate the
//! spec a caller handed in.
//!
//! The filter tree normalizes `!=` and `IN` at construction time into
//! disjunctions, which is what later forces multi-query decomposition:
//! the wire grammar only supports conjunctions.

pub mod driver;
pub mod iterator;
pub mod result;
pub mod translate;

use crate::cursor::Cursor;
use crate::error::QueryError;
use crate::key::Key;
use crate::types::{PropertyOrder, Value};
use crate::wire::WireEntity;
use std::cmp::Ordering;
use std::time::Duration;

/// Wire-expressible comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl PropertyOp {
    fn matches(self, ordering: Ordering) -> bool {
        match self {
            PropertyOp::Eq => ordering == Ordering::Equal,
            PropertyOp::Lt => ordering == Ordering::Less,
            PropertyOp::Le => ordering != Ordering::Greater,
            PropertyOp::Gt => ordering == Ordering::Greater,
            PropertyOp::Ge => ordering != Ordering::Less,
        }
    }

    fn is_inequality(self) -> bool {
        self != PropertyOp::Eq
    }
}

/// A node in the filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Compare {
        property: String,
        op: PropertyOp,
        value: Value,
    },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
}

impl FilterNode {
    pub fn compare(property: &str, op: PropertyOp, value: Value) -> Self {
        FilterNode::Compare {
            property: property.to_string(),
            op,
            value,
        }
    }

    /// `property != value`, normalized to `< OR >`.
    pub fn not_equal(property: &str, value: Value) -> Self {
        FilterNode::Or(vec![
            FilterNode::compare(property, PropertyOp::Lt, value.clone()),
            FilterNode::compare(property, PropertyOp::Gt, value),
        ])
    }

    /// `property IN values`, normalized to a disjunction of equalities.
    pub fn in_list(property: &str, values: Vec<Value>) -> Result<Self, QueryError> {
        if values.is_empty() {
            return Err(QueryError::InvalidFilter(
                "IN filter requires at least one value".to_string(),
            ));
        }
        if values.len() == 1 {
            let value = values.into_iter().next().unwrap_or(Value::Null);
            return Ok(FilterNode::compare(property, PropertyOp::Eq, value));
        }
        Ok(FilterNode::Or(
            values
                .into_iter()
                .map(|value| FilterNode::compare(property, PropertyOp::Eq, value))
                .collect(),
        ))
    }

    /// Conjunction; flattens nested ANDs and distributes over any OR
    /// children so disjunction only ever appears at the top of the tree.
    pub fn and(nodes: Vec<FilterNode>) -> Self {
        let mut conjuncts: Vec<FilterNode> = Vec::new();
        let mut disjunctions: Vec<Vec<FilterNode>> = Vec::new();

        for node in nodes {
            match node {
                FilterNode::And(children) => conjuncts.extend(children),
                FilterNode::Or(children) => disjunctions.push(children),
                leaf => conjuncts.push(leaf),
            }
        }

        if disjunctions.is_empty() {
            if conjuncts.len() == 1 {
                return conjuncts.pop().unwrap_or(FilterNode::And(Vec::new()));
            }
            return FilterNode::And(conjuncts);
        }

        // Cartesian product of the OR branches, each combined with the
        // plain conjuncts.
        let mut branches: Vec<Vec<FilterNode>> = vec![conjuncts];
        for disjunction in disjunctions {
            let mut expanded = Vec::new();
            for branch in &branches {
                for alternative in &disjunction {
                    let mut combined = branch.clone();
                    match alternative.clone() {
                        FilterNode::And(children) => combined.extend(children),
                        other => combined.push(other),
                    }
                    expanded.push(combined);
                }
            }
            branches = expanded;
        }

        FilterNode::Or(
            branches
                .into_iter()
                .map(|mut branch| {
                    if branch.len() == 1 {
                        branch.pop().unwrap_or(FilterNode::And(Vec::new()))
                    } else {
                        FilterNode::And(branch)
                    }
                })
                .collect(),
        )
    }

    /// Disjunction; flattens nested ORs.
    pub fn or(nodes: Vec<FilterNode>) -> Self {
        let mut disjuncts = Vec::new();
        for node in nodes {
            match node {
                FilterNode::Or(children) => disjuncts.extend(children),
                other => disjuncts.push(other),
            }
        }
        if disjuncts.len() == 1 {
            return disjuncts.pop().unwrap_or(FilterNode::Or(Vec::new()));
        }
        FilterNode::Or(disjuncts)
    }

    /// A top-level disjunction cannot be expressed as one wire query.
    pub fn is_multiquery(&self) -> bool {
        matches!(self, FilterNode::Or(_))
    }

    /// The clauses of a top-level disjunction, one per sub-query.
    pub fn disjuncts(&self) -> Vec<FilterNode> {
        match self {
            FilterNode::Or(children) => children.clone(),
            other => vec![other.clone()],
        }
    }

    /// Conjunct leaves of a disjunction-free tree.
    fn leaves(&self) -> Result<Vec<&FilterNode>, QueryError> {
        match self {
            FilterNode::Compare { .. } => Ok(vec![self]),
            FilterNode::And(children) => {
                let mut leaves = Vec::new();
                for child in children {
                    leaves.extend(child.leaves()?);
                }
                Ok(leaves)
            }
            FilterNode::Or(_) => Err(QueryError::InvalidFilter(
                "Disjunction must be decomposed before filter splitting".to_string(),
            )),
        }
    }

    /// Split a disjunction-free tree into the wire-expressible part and
    /// the post-filter part.
    ///
    /// The backend supports inequality comparisons on a single property
    /// per query. The first inequality property encountered is native;
    /// inequalities on any other property must be evaluated in memory
    /// after fetch.
    pub fn split_post_filters(&self) -> Result<(Option<FilterNode>, Option<FilterNode>), QueryError> {
        let leaves = self.leaves()?;

        let mut primary_inequality: Option<&str> = None;
        let mut native = Vec::new();
        let mut post = Vec::new();

        for leaf in leaves {
            let FilterNode::Compare { property, op, .. } = leaf else {
                continue;
            };
            if !op.is_inequality() {
                native.push(leaf.clone());
                continue;
            }
            match primary_inequality {
                None => {
                    primary_inequality = Some(property);
                    native.push(leaf.clone());
                }
                Some(primary) if primary == property => native.push(leaf.clone()),
                Some(_) => post.push(leaf.clone()),
            }
        }

        let collapse = |mut nodes: Vec<FilterNode>| -> Option<FilterNode> {
            match nodes.len() {
                0 => None,
                1 => nodes.pop(),
                _ => Some(FilterNode::And(nodes)),
            }
        };

        Ok((collapse(native), collapse(post)))
    }

    /// Evaluate this filter against a wire entity. Missing properties
    /// fail comparisons.
    pub fn evaluate(&self, entity: &WireEntity) -> bool {
        match self {
            FilterNode::Compare {
                property,
                op,
                value,
            } => match entity.properties.get(property) {
                Some(actual) => op.matches(actual.compare(value)),
                None => false,
            },
            FilterNode::And(children) => children.iter().all(|child| child.evaluate(entity)),
            FilterNode::Or(children) => children.iter().any(|child| child.evaluate(entity)),
        }
    }
}

/// An immutable, declarative query description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    pub kind: Option<String>,
    pub filters: Option<FilterNode>,
    pub order_by: Vec<PropertyOrder>,
    pub projection: Vec<String>,
    pub distinct_on: Vec<String>,
    pub ancestor: Option<Key>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub start_cursor: Option<Cursor>,
    pub end_cursor: Option<Cursor>,
    pub namespace: Option<String>,
    pub project: Option<String>,
    pub timeout: Option<Duration>,
}

impl QuerySpec {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: Some(kind.to_string()),
            ..Default::default()
        }
    }

    /// Start a derived copy of this spec with overrides.
    pub fn derive(&self) -> QuerySpecBuilder {
        QuerySpecBuilder {
            spec: self.clone(),
        }
    }

    /// Whether this spec must be decomposed into multiple wire queries.
    pub fn requires_multiquery(&self) -> bool {
        self.filters
            .as_ref()
            .map(|filters| filters.is_multiquery())
            .unwrap_or(false)
    }

    /// The post-filter part of this spec's filters, if any.
    pub fn post_filters(&self) -> Result<Option<FilterNode>, QueryError> {
        match &self.filters {
            Some(filters) if !filters.is_multiquery() => {
                let (_, post) = filters.split_post_filters()?;
                Ok(post)
            }
            _ => Ok(None),
        }
    }
}

/// Derive-with-overrides builder for [`QuerySpec`].
#[derive(Debug, Clone)]
pub struct QuerySpecBuilder {
    spec: QuerySpec,
}

impl QuerySpecBuilder {
    pub fn filters(mut self, filters: Option<FilterNode>) -> Self {
        self.spec.filters = filters;
        self
    }

    pub fn order_by(mut self, order_by: Vec<PropertyOrder>) -> Self {
        self.spec.order_by = order_by;
        self
    }

    pub fn projection(mut self, projection: Vec<String>) -> Self {
        self.spec.projection = projection;
        self
    }

    pub fn distinct_on(mut self, distinct_on: Vec<String>) -> Self {
        self.spec.distinct_on = distinct_on;
        self
    }

    pub fn ancestor(mut self, ancestor: Option<Key>) -> Self {
        self.spec.ancestor = ancestor;
        self
    }

    pub fn limit(mut self, limit: Option<u32>) -> Self {
        self.spec.limit = limit;
        self
    }

    pub fn offset(mut self, offset: Option<u32>) -> Self {
        self.spec.offset = offset;
        self
    }

    pub fn start_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.spec.start_cursor = cursor;
        self
    }

    pub fn end_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.spec.end_cursor = cursor;
        self
    }

    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.spec.namespace = namespace;
        self
    }

    pub fn project(mut self, project: Option<String>) -> Self {
        self.spec.project = project;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.spec.timeout = timeout;
        self
    }

    pub fn build(self) -> QuerySpec {
        self.spec
    }
}
