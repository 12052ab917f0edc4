//! Stateful in-memory substrate for the docmem document engine.
//!
//! This crate pairs the pure machinery of `docmem-core` with the parts that
//! own state:
//!
//! - **Indexes** ([`index`]) - Ordered/unique key buckets over shared
//!   documents
//! - **Geo indexes** ([`geo`]) - Geohash-bucketed proximity search
//! - **The store** ([`store`]) - [`MemoryStore`], the in-memory
//!   [`StoreBackend`](docmem_core::backend::StoreBackend) implementation
//! - **Map/reduce** ([`mapreduce`]) - The host boundary for external map and
//!   reduce programs
//!
//! # Quick Start
//!
//! ```ignore
//! use docmem_engine::MemoryStore;
//! use docmem_core::backend::StoreBackend;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), docmem_core::error::EngineError> {
//!     let store = MemoryStore::new();
//!     store
//!         .insert_documents(vec![doc! { "name": "Alice", "age": 30 }], "users")
//!         .await?;
//!
//!     let adults = store.find(&doc! { "age": { "$gte": 18 } }, "users").await?;
//!     assert_eq!(adults.len(), 1);
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmem_engine;

pub mod geo;
pub mod index;
pub mod mapreduce;
pub mod store;

pub use geo::GeoIndex;
pub use index::{Index, IndexKey};
pub use mapreduce::{MapReduceHost, run_map_reduce};
pub use store::MemoryStore;
