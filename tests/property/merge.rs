//! Disjunction merge conservation properties.
//!
//! For any split of a document population across two disjunction
//! branches, an ordered merged fetch with offset and limit returns
//! exactly the corresponding slice of the sorted distinct union.

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use quarry::datastore::DatastoreRpc;
use quarry::error::RpcError;
use quarry::key::{Id, Key};
use quarry::types::{PropertyOrder, Value};
use quarry::wire::{
    EntityResult, MoreResults, PropertyFilter, QueryBatch, ResultKind, RunQueryRequest,
    RunQueryResponse, WireEntity, WireFilter,
};
use quarry::{fetch, Context, FilterNode, QuerySpec, ResultItem};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Serves one pre-sorted batch per disjunction branch, routed by the
/// branch's equality value.
struct BranchDatastore {
    branches: Mutex<HashMap<i64, QueryBatch>>,
}

fn equality_value(filter: &WireFilter) -> Option<i64> {
    match filter {
        WireFilter::Property(PropertyFilter {
            value: Value::Int(value),
            ..
        }) => Some(*value),
        WireFilter::Property(_) => None,
        WireFilter::CompositeAnd(children) => children.iter().find_map(equality_value),
    }
}

#[async_trait]
impl DatastoreRpc for BranchDatastore {
    async fn run_query(&self, request: RunQueryRequest) -> Result<RunQueryResponse, RpcError> {
        let branch = request
            .query
            .filter
            .as_ref()
            .and_then(equality_value)
            .and_then(|value| self.branches.lock().remove(&value));
        Ok(RunQueryResponse {
            batch: branch.unwrap_or(QueryBatch {
                entity_result_type: ResultKind::Full,
                entity_results: vec![],
                more_results: MoreResults::NoMoreResults,
                end_cursor: vec![],
                skipped_results: 0,
            }),
        })
    }
}

fn doc(id: u8) -> EntityResult {
    let mut properties = BTreeMap::new();
    properties.insert("size".to_string(), Value::Int(id as i64));
    EntityResult {
        entity: WireEntity {
            key: Key::new("Doc", Id::IntId(id as i64)),
            properties,
        },
        cursor: vec![id],
    }
}

fn branch_batch(ids: &[u8]) -> QueryBatch {
    let results: Vec<EntityResult> = ids.iter().map(|&id| doc(id)).collect();
    QueryBatch {
        entity_result_type: ResultKind::Full,
        entity_results: results,
        more_results: MoreResults::NoMoreResults,
        end_cursor: ids.last().map(|&id| vec![id]).unwrap_or_default(),
        skipped_results: 0,
    }
}

/// The merged, deduplicated, offset/limited fetch equals the same slice
/// of the sorted distinct union computed directly.
#[test]
fn test_merged_fetch_matches_sorted_union_slice_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    let strategy = (
        // Per-document membership in (branch 1, branch 2).
        prop::collection::vec(any::<(bool, bool)>(), 0..8),
        0u32..6,
        prop::option::of(0u32..6),
    );

    runner
        .run(&strategy, |(memberships, offset, limit)| {
            let mut branch1 = Vec::new();
            let mut branch2 = Vec::new();
            let mut union = Vec::new();
            for (index, (in_first, in_second)) in memberships.iter().enumerate() {
                let id = index as u8 + 1;
                if *in_first {
                    branch1.push(id);
                }
                if *in_second {
                    branch2.push(id);
                }
                if *in_first || *in_second {
                    union.push(id as i64);
                }
            }

            let mut expected: Vec<i64> = union;
            expected.sort_unstable();
            let skip = offset as usize;
            let take = limit.map(|l| l as usize).unwrap_or(usize::MAX);
            let expected: Vec<i64> =
                expected.into_iter().skip(skip).take(take).collect();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let actual = runtime.block_on(async {
                let mut branches = HashMap::new();
                branches.insert(1, branch_batch(&branch1));
                branches.insert(2, branch_batch(&branch2));
                let datastore = Arc::new(BranchDatastore {
                    branches: Mutex::new(branches),
                });
                let ctx = Context::builder(datastore).build();

                let spec = QuerySpec::new("Doc")
                    .derive()
                    .filters(Some(
                        FilterNode::in_list(
                            "state",
                            vec![Value::Int(1), Value::Int(2)],
                        )
                        .expect("non-empty IN"),
                    ))
                    .order_by(vec![PropertyOrder::ascending("size")])
                    .offset(Some(offset))
                    .limit(limit)
                    .build();

                let items = fetch(&ctx, spec).await.expect("fetch");
                items
                    .into_iter()
                    .map(|item| match item {
                        ResultItem::Entity(entity) => match entity.property("size") {
                            Some(Value::Int(size)) => *size,
                            other => panic!("unexpected size: {:?}", other),
                        },
                        ResultItem::Key(key) => panic!("unexpected key item: {:?}", key),
                    })
                    .collect::<Vec<i64>>()
            });

            prop_assert_eq!(actual, expected);
            Ok(())
        })
        .unwrap();
}
