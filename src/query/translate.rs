//! Pure translation from a declarative query spec to the wire request.
//!
//! Disjunctions must already have been decomposed by the iterator layer;
//! the wire grammar only has AND composites. The ancestor constraint is
//! folded in as a has-ancestor comparison on the `__key__`
//! pseudo-property.

use crate::query::{FilterNode, PropertyOp, QuerySpec};
use crate::types::{Value, KEY_PROPERTY};
use crate::wire::{PropertyFilter, WireFilter, WireOp, WireOrder, WireQuery};

impl From<PropertyOp> for WireOp {
    fn from(op: PropertyOp) -> Self {
        match op {
            PropertyOp::Eq => WireOp::Equal,
            PropertyOp::Lt => WireOp::LessThan,
            PropertyOp::Le => WireOp::LessThanOrEqual,
            PropertyOp::Gt => WireOp::GreaterThan,
            PropertyOp::Ge => WireOp::GreaterThanOrEqual,
        }
    }
}

/// Map a query spec to the wire query structure.
///
/// Only the wire-expressible part of the filter tree is emitted; callers
/// split post filters off beforehand. `Some(0)` offsets and limits are
/// encoded; `None` leaves the wire field unset.
pub fn query_to_wire(query: &QuerySpec) -> WireQuery {
    let mut filter = query
        .filters
        .as_ref()
        .and_then(|filters| match filters.split_post_filters() {
            Ok((native, _)) => native,
            // A disjunction here is an upstream bug; emit no filter rather
            // than a wire shape the backend would reject.
            Err(_) => None,
        })
        .map(filter_to_wire);

    if let Some(ancestor) = &query.ancestor {
        let ancestor_filter = WireFilter::Property(PropertyFilter {
            property: KEY_PROPERTY.to_string(),
            op: WireOp::HasAncestor,
            value: Value::Key(ancestor.clone()),
        });

        filter = Some(match filter {
            None => ancestor_filter,
            Some(WireFilter::CompositeAnd(mut children)) => {
                children.push(ancestor_filter);
                WireFilter::CompositeAnd(children)
            }
            Some(single) => WireFilter::CompositeAnd(vec![single, ancestor_filter]),
        });
    }

    WireQuery {
        kind: query.kind.clone(),
        projection: query.projection.clone(),
        distinct_on: query.distinct_on.clone(),
        order: query
            .order_by
            .iter()
            .map(|order| WireOrder {
                property: order.name.clone(),
                direction: order.direction,
            })
            .collect(),
        filter,
        start_cursor: query
            .start_cursor
            .as_ref()
            .map(|cursor| cursor.bytes().to_vec()),
        end_cursor: query
            .end_cursor
            .as_ref()
            .map(|cursor| cursor.bytes().to_vec()),
        offset: query.offset,
        limit: query.limit,
    }
}

fn filter_to_wire(node: FilterNode) -> WireFilter {
    match node {
        FilterNode::Compare {
            property,
            op,
            value,
        } => WireFilter::Property(PropertyFilter {
            property,
            op: op.into(),
            value,
        }),
        FilterNode::And(children) => {
            WireFilter::CompositeAnd(children.into_iter().map(filter_to_wire).collect())
        }
        // Unreachable after split_post_filters.
        FilterNode::Or(children) => {
            WireFilter::CompositeAnd(children.into_iter().map(filter_to_wire).collect())
        }
    }
}
