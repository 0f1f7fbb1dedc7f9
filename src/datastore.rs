//! The RPC collaborator seam and the query call driver.
//!
//! The transport to the remote store is external; it is consumed through
//! the [`DatastoreRpc`] trait. [`run_query`] translates a query spec,
//! attaches the ambient read options, and drives the call through the
//! retry layer.

use crate::context::Context;
use crate::error::RpcError;
use crate::query::translate::query_to_wire;
use crate::query::QuerySpec;
use crate::retry::retry_transient;
use crate::wire::{ReadOptions, RunQueryRequest, RunQueryResponse};
use async_trait::async_trait;
use tracing::trace;

/// Wire-level access to the remote document store.
#[async_trait]
pub trait DatastoreRpc: Send + Sync {
    /// Execute one paginated query request, returning a single batch.
    async fn run_query(&self, request: RunQueryRequest) -> Result<RunQueryResponse, RpcError>;
}

/// Translate and run one query RPC, with retry and optional timeout.
pub async fn run_query(ctx: &Context, query: &QuerySpec) -> Result<RunQueryResponse, RpcError> {
    let request = RunQueryRequest {
        project: query
            .project
            .clone()
            .unwrap_or_else(|| ctx.config().project.clone()),
        namespace: query
            .namespace
            .clone()
            .or_else(|| ctx.config().namespace.clone()),
        query: query_to_wire(query),
        read_options: ReadOptions {
            transaction: ctx.transaction().map(|txn| txn.to_vec()),
        },
    };
    let timeout = query.timeout;

    let response = retry_transient(&ctx.config().retry, || {
        let request = request.clone();
        async move {
            let call = ctx.datastore().run_query(request);
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(RpcError::Timeout(limit)),
                },
                None => call.await,
            }
        }
    })
    .await?;

    trace!(
        results = response.batch.entity_results.len(),
        skipped = response.batch.skipped_results,
        more = ?response.batch.more_results,
        "run_query batch"
    );
    Ok(response)
}

/// Convenience alias for trait objects held by a context.
pub type SharedDatastore = std::sync::Arc<dyn DatastoreRpc>;
