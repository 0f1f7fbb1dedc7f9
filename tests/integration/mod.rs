//! Integration tests for the query execution and caching layer

mod counting;
mod lock_protocol;
mod query_iteration;
