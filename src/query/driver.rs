//! High-level query entry points: fetch everything, or count cheaply.

use crate::context::Context;
use crate::cursor::Cursor;
use crate::datastore;
use crate::error::QueryError;
use crate::query::iterator::iterate;
use crate::query::result::ResultItem;
use crate::query::QuerySpec;
use crate::types::KEY_PROPERTY;
use crate::wire::MoreResults;
use std::sync::Arc;
use tracing::debug;

/// How far one skip-probe advances when the count is uncapped.
const MAX_COUNT_SKIP: u32 = 10_000;

/// Run a query and collect every result.
pub async fn fetch(ctx: &Arc<Context>, spec: QuerySpec) -> Result<Vec<ResultItem>, QueryError> {
    let mut iter = iterate(ctx, spec)?;
    let mut items = Vec::new();
    while let Some(item) = iter.next().await? {
        items.push(item);
    }
    Ok(items)
}

/// Count the results a query would return, up to its limit if it has one.
///
/// A plain single query is counted by skipping: repeated key-only probes
/// with `limit 1` and a large offset, summing what each probe skipped
/// and returned, so almost no result data crosses the wire. Queries the
/// backend cannot express in one call (disjunctions, in-memory filter
/// residue) and emulated backends with unreliable skip accounting fall
/// back to brute-force iteration over a key-only projection.
pub async fn count(ctx: &Arc<Context>, spec: &QuerySpec) -> Result<u32, QueryError> {
    let up_to = spec.limit;
    if spec.requires_multiquery()
        || spec.post_filters()?.is_some()
        || ctx.config().emulated_backend
    {
        debug!(kind = ?spec.kind, "counting by brute force");
        return count_brute_force(ctx, spec, up_to).await;
    }
    count_by_skipping(ctx, spec, up_to).await
}

async fn count_brute_force(
    ctx: &Arc<Context>,
    spec: &QuerySpec,
    up_to: Option<u32>,
) -> Result<u32, QueryError> {
    // Only identities matter, and without a caller-visible ordering the
    // merge can concatenate instead of sort.
    let probe = spec
        .derive()
        .projection(vec![KEY_PROPERTY.to_string()])
        .order_by(Vec::new())
        .offset(None)
        .limit(up_to)
        .build();

    let mut iter = iterate(ctx, probe)?;
    let mut total: u32 = 0;
    while iter.next_raw().await?.is_some() {
        total += 1;
        if let Some(cap) = up_to {
            if total >= cap {
                return Ok(cap);
            }
        }
    }
    Ok(total)
}

async fn count_by_skipping(
    ctx: &Arc<Context>,
    spec: &QuerySpec,
    up_to: Option<u32>,
) -> Result<u32, QueryError> {
    let base = spec
        .derive()
        .projection(vec![KEY_PROPERTY.to_string()])
        .order_by(Vec::new())
        .offset(None)
        .limit(None)
        .build();

    let mut start_cursor = spec.start_cursor.clone();
    let mut total: u32 = 0;
    loop {
        let budget = match up_to {
            // Skip at most up to the cap; the single returned result
            // lands the count exactly on it.
            Some(cap) => cap.saturating_sub(total).saturating_sub(1),
            None => MAX_COUNT_SKIP,
        };
        let probe = base
            .derive()
            .offset(Some(budget))
            .limit(Some(1))
            .start_cursor(start_cursor.clone())
            .build();

        let batch = datastore::run_query(ctx, &probe).await?.batch;
        total = total
            .saturating_add(batch.skipped_results)
            .saturating_add(batch.entity_results.len() as u32);

        if let Some(cap) = up_to {
            if total >= cap {
                return Ok(cap);
            }
        }
        if batch.more_results == MoreResults::NoMoreResults {
            return Ok(total);
        }
        start_cursor = Some(Cursor::new(batch.end_cursor));
    }
}
