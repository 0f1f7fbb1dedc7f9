//! Query result iterators.
//!
//! Three shapes, selected by [`iterate`] from the spec alone:
//!
//! * [`SingleQueryIterator`] pages one wire query, following batch
//!   continuations and keeping cursor positions.
//! * [`PostFilterIterator`] wraps a single-query stream and applies the
//!   in-memory residue of the filter tree, then offset, then limit; the
//!   wire query runs unbounded because the backend cannot know how many
//!   raw results the predicate will discard.
//! * [`MultiQueryIterator`] decomposes a disjunction into per-clause
//!   sub-queries, polls them concurrently, merges by the shared ordering
//!   (or concatenates when unordered), and deduplicates identities that
//!   satisfy more than one clause.

use crate::context::Context;
use crate::cursor::Cursor;
use crate::datastore;
use crate::error::QueryError;
use crate::query::result::{RawResult, ResultItem};
use crate::query::{FilterNode, QuerySpec};
use crate::types::KEY_PROPERTY;
use crate::wire::{MoreResults, ResultKind};
use futures::future::join_all;
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Build the iterator a spec calls for.
pub fn iterate(ctx: &Arc<Context>, spec: QuerySpec) -> Result<QueryIterator, QueryError> {
    if spec.requires_multiquery() {
        return Ok(QueryIterator::Multi(MultiQueryIterator::new(ctx, spec)?));
    }
    if spec.post_filters()?.is_some() {
        return Ok(QueryIterator::PostFilter(PostFilterIterator::new(
            ctx, spec,
        )?));
    }
    Ok(QueryIterator::Single(SingleQueryIterator::new(ctx, spec)))
}

/// Iterator over one wire query's result stream.
pub struct SingleQueryIterator {
    ctx: Arc<Context>,
    spec: QuerySpec,
    buffer: VecDeque<RawResult>,
    started: bool,
    has_next_batch: bool,
    more_results_after_limit: bool,
    cursor_before: Option<Cursor>,
    cursor_after: Option<Cursor>,
}

impl SingleQueryIterator {
    pub fn new(ctx: &Arc<Context>, spec: QuerySpec) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            spec,
            buffer: VecDeque::new(),
            started: false,
            has_next_batch: false,
            more_results_after_limit: false,
            cursor_before: None,
            cursor_after: None,
        }
    }

    /// Fetch the next batch, advancing the working spec: the start cursor
    /// moves to the batch end, and offset/limit shrink by what the batch
    /// consumed.
    async fn next_batch(&mut self) -> Result<(), QueryError> {
        let response = datastore::run_query(&self.ctx, &self.spec).await?;
        let batch = response.batch;
        self.started = true;

        self.spec = self
            .spec
            .derive()
            .start_cursor(Some(Cursor::new(batch.end_cursor.clone())))
            .offset(
                self.spec
                    .offset
                    .map(|offset| offset.saturating_sub(batch.skipped_results)),
            )
            .limit(
                self.spec
                    .limit
                    .map(|limit| limit.saturating_sub(batch.entity_results.len() as u32)),
            )
            .build();

        self.has_next_batch = batch.more_results == MoreResults::NotFinished;
        self.more_results_after_limit =
            batch.more_results == MoreResults::MoreResultsAfterLimit;

        let order_by = self.spec.order_by.clone();
        for record in batch.entity_results {
            let raw = RawResult::new(batch.entity_result_type, record, order_by.clone());
            // Entities the context knows are deleted never surface, even
            // when the index still lists them.
            if batch.entity_result_type == ResultKind::Full && raw.is_tombstoned(&self.ctx) {
                debug!(kind = raw.key().kind(), "dropping tombstoned result");
                continue;
            }
            self.buffer.push_back(raw);
        }
        Ok(())
    }

    /// Whether another result is available, fetching batches as needed.
    ///
    /// A batch may be empty while the backend still reports the query
    /// unfinished; continuation loops until a result arrives or the
    /// stream truly ends.
    pub async fn has_next(&mut self) -> Result<bool, QueryError> {
        loop {
            if !self.buffer.is_empty() {
                return Ok(true);
            }
            if !self.started || self.has_next_batch {
                self.next_batch().await?;
                continue;
            }
            return Ok(false);
        }
    }

    /// Cheap liveness check that never issues an RPC. May report true
    /// for a stream that turns out to be empty.
    pub fn probably_has_next(&self) -> bool {
        !self.started || !self.buffer.is_empty() || self.has_next_batch
    }

    pub async fn next_raw(&mut self) -> Result<Option<RawResult>, QueryError> {
        if !self.has_next().await? {
            return Ok(None);
        }
        let Some(raw) = self.buffer.pop_front() else {
            return Ok(None);
        };
        self.cursor_before = self.cursor_after.take();
        self.cursor_after = Some(raw.cursor());
        Ok(Some(raw))
    }

    /// Cursor positioned just before the most recently returned result.
    pub fn cursor_before(&self) -> Result<Cursor, QueryError> {
        self.cursor_before.clone().ok_or(QueryError::NoCursor)
    }

    /// Cursor positioned just after the most recently returned result.
    pub fn cursor_after(&self) -> Result<Cursor, QueryError> {
        self.cursor_after.clone().ok_or(QueryError::NoCursor)
    }

    /// Whether the last batch ended because the limit was reached while
    /// more matching results remain.
    pub fn more_results_after_limit(&self) -> bool {
        self.more_results_after_limit
    }

    fn context(&self) -> &Arc<Context> {
        &self.ctx
    }
}

/// Iterator applying in-memory filter residue over a raw stream.
///
/// Cursor positions track qualifying results only; records the predicate
/// rejects never move them.
pub struct PostFilterIterator {
    inner: SingleQueryIterator,
    predicate: FilterNode,
    remaining_offset: u32,
    remaining_limit: Option<u32>,
    peeked: Option<RawResult>,
    cursor_before: Option<Cursor>,
    cursor_after: Option<Cursor>,
}

impl PostFilterIterator {
    pub fn new(ctx: &Arc<Context>, spec: QuerySpec) -> Result<Self, QueryError> {
        let Some(predicate) = spec.post_filters()? else {
            return Err(QueryError::InvalidFilter(
                "Post-filter iterator requires an in-memory filter residue".to_string(),
            ));
        };
        let remaining_offset = spec.offset.unwrap_or(0);
        let remaining_limit = spec.limit;
        // Offset and limit apply to the filtered stream, so the wire
        // query must run unbounded.
        let inner_spec = spec.derive().offset(None).limit(None).build();
        Ok(Self {
            inner: SingleQueryIterator::new(ctx, inner_spec),
            predicate,
            remaining_offset,
            remaining_limit,
            peeked: None,
            cursor_before: None,
            cursor_after: None,
        })
    }

    async fn advance(&mut self) -> Result<Option<RawResult>, QueryError> {
        if self.remaining_limit == Some(0) {
            return Ok(None);
        }
        loop {
            let Some(raw) = self.inner.next_raw().await? else {
                return Ok(None);
            };
            if !self.predicate.evaluate(&raw.record.entity) {
                continue;
            }
            if self.remaining_offset > 0 {
                self.remaining_offset -= 1;
                continue;
            }
            if let Some(limit) = &mut self.remaining_limit {
                *limit -= 1;
            }
            self.cursor_before = self.cursor_after.take();
            self.cursor_after = Some(raw.cursor());
            return Ok(Some(raw));
        }
    }

    pub async fn has_next(&mut self) -> Result<bool, QueryError> {
        if self.peeked.is_none() {
            self.peeked = self.advance().await?;
        }
        Ok(self.peeked.is_some())
    }

    pub fn probably_has_next(&self) -> bool {
        self.peeked.is_some()
            || (self.remaining_limit != Some(0) && self.inner.probably_has_next())
    }

    pub async fn next_raw(&mut self) -> Result<Option<RawResult>, QueryError> {
        if !self.has_next().await? {
            return Ok(None);
        }
        Ok(self.peeked.take())
    }

    pub fn cursor_before(&self) -> Result<Cursor, QueryError> {
        self.cursor_before.clone().ok_or(QueryError::NoCursor)
    }

    pub fn cursor_after(&self) -> Result<Cursor, QueryError> {
        self.cursor_after.clone().ok_or(QueryError::NoCursor)
    }

    pub fn more_results_after_limit(&self) -> bool {
        self.inner.more_results_after_limit()
    }

    fn context(&self) -> &Arc<Context> {
        self.inner.context()
    }
}

/// One disjunction clause's stream inside a multi-query.
///
/// Disjunction never nests under disjunction after filter normalization,
/// so a clause is always a plain or post-filtered single query.
pub enum PlainIterator {
    Single(SingleQueryIterator),
    PostFilter(PostFilterIterator),
}

impl PlainIterator {
    fn new(ctx: &Arc<Context>, spec: QuerySpec) -> Result<Self, QueryError> {
        if spec.post_filters()?.is_some() {
            Ok(PlainIterator::PostFilter(PostFilterIterator::new(
                ctx, spec,
            )?))
        } else {
            Ok(PlainIterator::Single(SingleQueryIterator::new(ctx, spec)))
        }
    }

    async fn next_raw(&mut self) -> Result<Option<RawResult>, QueryError> {
        match self {
            PlainIterator::Single(iter) => iter.next_raw().await,
            PlainIterator::PostFilter(iter) => iter.next_raw().await,
        }
    }

    fn probably_has_next(&self) -> bool {
        match self {
            PlainIterator::Single(iter) => iter.probably_has_next(),
            PlainIterator::PostFilter(iter) => iter.probably_has_next(),
        }
    }
}

/// Merging iterator over the clauses of a disjunction.
pub struct MultiQueryIterator {
    ctx: Arc<Context>,
    subs: Vec<PlainIterator>,
    heads: Vec<Option<RawResult>>,
    seen: HashSet<Vec<u8>>,
    ordered: bool,
    remaining_offset: u32,
    remaining_limit: Option<u32>,
    wanted_projection: Vec<String>,
    augmented: bool,
    peeked: Option<RawResult>,
}

impl MultiQueryIterator {
    pub fn new(ctx: &Arc<Context>, spec: QuerySpec) -> Result<Self, QueryError> {
        if spec.start_cursor.is_some() || spec.end_cursor.is_some() {
            return Err(QueryError::CursorUnsupported);
        }
        let Some(filters) = spec.filters.clone() else {
            return Err(QueryError::InvalidFilter(
                "Multi-query requires a disjunctive filter".to_string(),
            ));
        };

        let ordered = !spec.order_by.is_empty();

        // The merge compares results by the ordering properties, so a
        // projection must cover them even if the caller did not ask for
        // them; the extras are stripped again on the way out.
        let mut sub_projection = spec.projection.clone();
        let mut augmented = false;
        if !sub_projection.is_empty() {
            for order in &spec.order_by {
                if order.name != KEY_PROPERTY && !sub_projection.contains(&order.name) {
                    sub_projection.push(order.name.clone());
                    augmented = true;
                }
            }
        }

        let mut subs = Vec::new();
        for disjunct in filters.disjuncts() {
            let sub_spec = spec
                .derive()
                .filters(Some(disjunct))
                .projection(sub_projection.clone())
                .offset(None)
                .limit(None)
                .start_cursor(None)
                .end_cursor(None)
                .build();
            subs.push(PlainIterator::new(ctx, sub_spec)?);
        }
        let heads = vec![None; subs.len()];

        Ok(Self {
            ctx: Arc::clone(ctx),
            subs,
            heads,
            seen: HashSet::new(),
            ordered,
            remaining_offset: spec.offset.unwrap_or(0),
            remaining_limit: spec.limit,
            wanted_projection: spec.projection,
            augmented,
            peeked: None,
        })
    }

    /// Refill empty heads, polling every starved sub-query concurrently.
    async fn fill_heads(&mut self) -> Result<(), QueryError> {
        let futures = self
            .subs
            .iter_mut()
            .zip(self.heads.iter_mut())
            .filter(|(_, head)| head.is_none())
            .map(|(sub, head)| async move {
                *head = sub.next_raw().await?;
                Ok::<(), QueryError>(())
            });
        for outcome in join_all(futures).await {
            outcome?;
        }
        Ok(())
    }

    /// Index of the head to emit next: the minimum under the shared
    /// ordering, first sub winning ties so the merge is stable. Without
    /// an ordering, clauses concatenate in declaration order.
    fn choose_head(&self) -> Result<Option<usize>, QueryError> {
        let mut best: Option<(usize, &RawResult)> = None;
        for (index, head) in self.heads.iter().enumerate() {
            let Some(candidate) = head else { continue };
            if !self.ordered {
                return Ok(Some(index));
            }
            best = match best {
                None => Some((index, candidate)),
                Some((best_index, incumbent)) => {
                    if candidate.compare(incumbent)? == Ordering::Less {
                        Some((index, candidate))
                    } else {
                        Some((best_index, incumbent))
                    }
                }
            };
        }
        Ok(best.map(|(index, _)| index))
    }

    /// Next merged result, before offset/limit accounting. An identity
    /// matching several clauses is emitted once, from the first stream
    /// that yields it.
    async fn next_merged(&mut self) -> Result<Option<RawResult>, QueryError> {
        loop {
            self.fill_heads().await?;
            let Some(index) = self.choose_head()? else {
                return Ok(None);
            };
            let Some(raw) = self.heads[index].take() else {
                return Ok(None);
            };
            if !self.seen.insert(raw.key().to_bytes()) {
                debug!(kind = raw.key().kind(), "dropping duplicate across sub-queries");
                continue;
            }
            return Ok(Some(raw));
        }
    }

    async fn advance(&mut self) -> Result<Option<RawResult>, QueryError> {
        if self.remaining_limit == Some(0) {
            return Ok(None);
        }
        loop {
            let Some(mut raw) = self.next_merged().await? else {
                return Ok(None);
            };
            if self.remaining_offset > 0 {
                self.remaining_offset -= 1;
                continue;
            }
            if let Some(limit) = &mut self.remaining_limit {
                *limit -= 1;
            }
            if self.augmented {
                raw.strip_extra_projections(&self.wanted_projection);
                raw.coerce_key_only();
            }
            return Ok(Some(raw));
        }
    }

    pub async fn has_next(&mut self) -> Result<bool, QueryError> {
        if self.peeked.is_none() {
            self.peeked = self.advance().await?;
        }
        Ok(self.peeked.is_some())
    }

    pub fn probably_has_next(&self) -> bool {
        if self.remaining_limit == Some(0) {
            return false;
        }
        self.peeked.is_some()
            || self.heads.iter().any(|head| head.is_some())
            || self.subs.iter().any(|sub| sub.probably_has_next())
    }

    pub async fn next_raw(&mut self) -> Result<Option<RawResult>, QueryError> {
        if !self.has_next().await? {
            return Ok(None);
        }
        Ok(self.peeked.take())
    }

    fn context(&self) -> &Arc<Context> {
        &self.ctx
    }
}

/// The caller-facing iterator over a query's results.
pub enum QueryIterator {
    Single(SingleQueryIterator),
    PostFilter(PostFilterIterator),
    Multi(MultiQueryIterator),
}

impl QueryIterator {
    pub async fn has_next(&mut self) -> Result<bool, QueryError> {
        match self {
            QueryIterator::Single(iter) => iter.has_next().await,
            QueryIterator::PostFilter(iter) => iter.has_next().await,
            QueryIterator::Multi(iter) => iter.has_next().await,
        }
    }

    pub fn probably_has_next(&self) -> bool {
        match self {
            QueryIterator::Single(iter) => iter.probably_has_next(),
            QueryIterator::PostFilter(iter) => iter.probably_has_next(),
            QueryIterator::Multi(iter) => iter.probably_has_next(),
        }
    }

    pub async fn next_raw(&mut self) -> Result<Option<RawResult>, QueryError> {
        match self {
            QueryIterator::Single(iter) => iter.next_raw().await,
            QueryIterator::PostFilter(iter) => iter.next_raw().await,
            QueryIterator::Multi(iter) => iter.next_raw().await,
        }
    }

    /// Next materialized result item.
    pub async fn next(&mut self) -> Result<Option<ResultItem>, QueryError> {
        let ctx = Arc::clone(self.context());
        Ok(self.next_raw().await?.map(|raw| raw.materialize(&ctx)))
    }

    /// Cursor just before the most recently returned result. Merged
    /// streams have no single cursor position.
    pub fn cursor_before(&self) -> Result<Cursor, QueryError> {
        match self {
            QueryIterator::Single(iter) => iter.cursor_before(),
            QueryIterator::PostFilter(iter) => iter.cursor_before(),
            QueryIterator::Multi(_) => Err(QueryError::CursorUnsupported),
        }
    }

    /// Cursor just after the most recently returned result.
    pub fn cursor_after(&self) -> Result<Cursor, QueryError> {
        match self {
            QueryIterator::Single(iter) => iter.cursor_after(),
            QueryIterator::PostFilter(iter) => iter.cursor_after(),
            QueryIterator::Multi(_) => Err(QueryError::CursorUnsupported),
        }
    }

    /// Whether the stream ended because the wire limit was reached while
    /// more matching results remain. Merged sub-queries run unlimited, so
    /// a disjunction never reports this.
    pub fn more_results_after_limit(&self) -> bool {
        match self {
            QueryIterator::Single(iter) => iter.more_results_after_limit(),
            QueryIterator::PostFilter(iter) => iter.more_results_after_limit(),
            QueryIterator::Multi(_) => false,
        }
    }

    fn context(&self) -> &Arc<Context> {
        match self {
            QueryIterator::Single(iter) => iter.context(),
            QueryIterator::PostFilter(iter) => iter.context(),
            QueryIterator::Multi(iter) => iter.context(),
        }
    }
}
