//! Counting strategies against a scripted backend.

use super::test_utils::{batch, context, doc, MockDatastore};
use quarry::types::KEY_PROPERTY;
use quarry::wire::{MoreResults, ResultKind};
use quarry::{count, QuerySpec};

#[tokio::test]
async fn test_skip_probes_accumulate_until_exhausted() {
    let datastore = MockDatastore::new().script(vec![
        batch(
            ResultKind::KeyOnly,
            vec![doc(1, 0)],
            9_000,
            MoreResults::NotFinished,
        ),
        batch(ResultKind::KeyOnly, vec![], 100, MoreResults::NoMoreResults),
    ]);
    let ctx = context(datastore.clone());

    let total = count(&ctx, &QuerySpec::new("Doc")).await.unwrap();
    assert_eq!(total, 9_101);

    let requests = datastore.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request.query.limit, Some(1));
        assert_eq!(request.query.projection, vec![KEY_PROPERTY.to_string()]);
        assert!(request.query.order.is_empty());
    }
    assert_eq!(requests[0].query.offset, Some(10_000));
    // The second probe resumes where the first ended.
    assert_eq!(requests[1].query.start_cursor.as_deref(), Some(&[1u8][..]));
}

#[tokio::test]
async fn test_capped_count_stops_early() {
    let datastore = MockDatastore::new().script(vec![batch(
        ResultKind::KeyOnly,
        vec![doc(1, 0)],
        9,
        MoreResults::NotFinished,
    )]);
    let ctx = context(datastore.clone());

    let spec = QuerySpec::new("Doc").derive().limit(Some(10)).build();
    assert_eq!(count(&ctx, &spec).await.unwrap(), 10);
    assert_eq!(datastore.requests().len(), 1);
    assert_eq!(datastore.requests()[0].query.offset, Some(9));
}
