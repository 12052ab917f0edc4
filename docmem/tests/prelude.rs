//! Smoke test for the facade's public surface.

use bson::doc;
use docmem::prelude::*;

#[tokio::test]
async fn prelude_covers_an_end_to_end_flow() -> EngineResult<()> {
    let store = MemoryStore::new();

    store
        .insert_documents(
            vec![
                doc! { "name": "Alice", "age": 30, "tags": ["admin"] },
                doc! { "name": "Bob", "age": 17 },
            ],
            "users",
        )
        .await?;

    let admins = store
        .find(&doc! { "age": { "$gte": 18 }, "tags": "admin" }, "users")
        .await?;
    assert_eq!(admins.len(), 1);

    store
        .update_documents(&doc! { "name": "Bob" }, &doc! { "$inc": { "age": 1 } }, "users")
        .await?;
    assert_eq!(store.count(&doc! { "age": 18 }, "users").await?, 1);

    let oldest = store
        .aggregate(
            &[doc! { "$sort": { "age": -1 } }, doc! { "$limit": 1 }],
            "users",
        )
        .await?;
    assert_eq!(oldest[0].get_str("name").unwrap(), "Alice");

    // The pure pieces are usable without a store.
    let filter = Filter::compile(&doc! { "age": { "$lt": 20 } })?;
    assert!(filter.matches(&doc! { "age": 18 }));

    let mut standalone = doc! { "counter": 1 };
    apply_update(&mut standalone, &doc! { "$inc": { "counter": 2 } })?;
    assert_eq!(standalone.get_i32("counter").unwrap(), 3);

    Ok(())
}
