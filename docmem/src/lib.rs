//! Embeddable in-memory document database engine with MongoDB-style query
//! semantics.
//!
//! This crate is the primary entry point for the docmem project. It re-exports
//! the pure query/update/aggregation machinery from `docmem-core` and the
//! stateful in-memory store from `docmem-engine`.
//!
//! # Features
//!
//! - **MongoDB-style queries** - `$gt`, `$in`, `$elemMatch`, `$regex` and
//!   friends compiled into reusable filters
//! - **Atomic updates** - `$set`/`$inc`/`$push`-style operators with conflict
//!   detection
//! - **Indexes** - unique, ordered, and geohash-bucketed proximity indexes
//!   sharing document instances with the store
//! - **Aggregation** - `$match`/`$project`/`$group`/`$sort`/`$unwind`
//!   pipelines
//!
//! # Quick Start
//!
//! ```ignore
//! use docmem::prelude::*;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> EngineResult<()> {
//!     let store = MemoryStore::new();
//!
//!     store
//!         .insert_documents(
//!             vec![
//!                 doc! { "name": "Alice", "age": 30, "tags": ["admin"] },
//!                 doc! { "name": "Bob", "age": 17 },
//!             ],
//!             "users",
//!         )
//!         .await?;
//!
//!     let admins = store
//!         .find(&doc! { "age": { "$gte": 18 }, "tags": "admin" }, "users")
//!         .await?;
//!     assert_eq!(admins.len(), 1);
//!
//!     store
//!         .update_documents(&doc! { "name": "Bob" }, &doc! { "$inc": { "age": 1 } }, "users")
//!         .await?;
//!
//!     let by_age = store
//!         .aggregate(
//!             &[doc! { "$sort": { "age": -1 } }, doc! { "$limit": 1 }],
//!             "users",
//!         )
//!         .await?;
//!     assert_eq!(by_age[0].get_str("name"), Ok("Alice"));
//!
//!     Ok(())
//! }
//! ```

pub use docmem_core as core;
pub use docmem_engine as engine;

pub mod prelude;
