//! End-to-end single-query iteration behavior against a scripted backend.

use super::test_utils::{batch, context, doc, doc_key, final_batch, MockDatastore};
use quarry::cache::CacheLookup;
use quarry::query::iterator::iterate;
use quarry::wire::{MoreResults, ResultKind};
use quarry::{fetch, QuerySpec, ResultItem};

#[tokio::test]
async fn test_fetch_follows_continuations_and_populates_cache() {
    let datastore = MockDatastore::new().script(vec![
        batch(
            ResultKind::Full,
            vec![doc(1, 10), doc(2, 20)],
            0,
            MoreResults::NotFinished,
        ),
        final_batch(vec![doc(3, 30)]),
    ]);
    let ctx = context(datastore);

    let items = fetch(&ctx, QuerySpec::new("Doc")).await.unwrap();
    assert_eq!(items.len(), 3);

    // Full results land in the context cache as they materialize.
    let lookup = ctx.cache().lock().get_and_validate(&doc_key(2));
    assert!(matches!(lookup, CacheLookup::Hit(Some(_))));
}

#[tokio::test]
async fn test_offset_and_limit_shrink_across_batches() {
    let datastore = MockDatastore::new().script(vec![
        batch(
            ResultKind::Full,
            vec![doc(3, 30), doc(4, 40)],
            2,
            MoreResults::NotFinished,
        ),
        final_batch(vec![doc(5, 50)]),
    ]);
    let ctx = context(datastore.clone());

    let spec = QuerySpec::new("Doc")
        .derive()
        .offset(Some(2))
        .limit(Some(3))
        .build();
    let items = fetch(&ctx, spec).await.unwrap();
    assert_eq!(items.len(), 3);

    let requests = datastore.requests();
    assert_eq!(requests[0].query.offset, Some(2));
    assert_eq!(requests[0].query.limit, Some(3));
    // The continuation accounts for what the first batch skipped and
    // returned.
    assert_eq!(requests[1].query.offset, Some(0));
    assert_eq!(requests[1].query.limit, Some(1));
}

#[tokio::test]
async fn test_tombstoned_entities_never_surface() {
    let datastore = MockDatastore::new().script(vec![final_batch(vec![doc(1, 10), doc(2, 20)])]);
    let ctx = context(datastore);
    ctx.cache().lock().set_tombstone(doc_key(1));

    let items = fetch(&ctx, QuerySpec::new("Doc")).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].key(), &doc_key(2));
}

#[tokio::test]
async fn test_resume_from_cursor() {
    let datastore = MockDatastore::new().script(vec![
        final_batch(vec![doc(1, 10), doc(2, 20)]),
        final_batch(vec![doc(2, 20)]),
    ]);
    let ctx = context(datastore.clone());

    let mut iter = iterate(&ctx, QuerySpec::new("Doc")).unwrap();
    iter.next().await.unwrap();
    let resume_from = iter.cursor_after().unwrap();

    let resumed = QuerySpec::new("Doc")
        .derive()
        .start_cursor(Some(resume_from))
        .build();
    fetch(&ctx, resumed).await.unwrap();

    let requests = datastore.requests();
    // The resumed request starts at the cursor following result 1.
    assert_eq!(requests[1].query.start_cursor.as_deref(), Some(&[1u8][..]));
}

#[tokio::test]
async fn test_projection_results_are_tagged() {
    let datastore = MockDatastore::new().script(vec![batch(
        ResultKind::Projection,
        vec![doc(1, 10)],
        0,
        MoreResults::NoMoreResults,
    )]);
    let ctx = context(datastore);

    let spec = QuerySpec::new("Doc")
        .derive()
        .projection(vec!["size".to_string()])
        .build();
    let items = fetch(&ctx, spec).await.unwrap();
    let ResultItem::Entity(entity) = &items[0] else {
        panic!("expected an entity result");
    };
    assert_eq!(entity.projection.as_deref(), Some(&["size".to_string()][..]));
}

#[tokio::test]
async fn test_key_only_results_are_keys() {
    let datastore = MockDatastore::new().script(vec![batch(
        ResultKind::KeyOnly,
        vec![doc(7, 0)],
        0,
        MoreResults::NoMoreResults,
    )]);
    let ctx = context(datastore);

    let items = fetch(&ctx, QuerySpec::new("Doc")).await.unwrap();
    assert_eq!(items, vec![ResultItem::Key(doc_key(7))]);
}
