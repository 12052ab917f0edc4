//! Storage backend abstraction for the document engine.
//!
//! The [`StoreBackend`] trait is the boundary between the pure query/update
//! machinery in this crate and whatever owns the documents. Implementations
//! are required to be thread-safe (`Send + Sync`); the reference in-memory
//! implementation lives in the engine crate.
//!
//! # Examples
//!
//! ```ignore
//! use docmem::prelude::*;
//! use bson::doc;
//!
//! let store = MemoryStore::new();
//! store
//!     .insert_documents(vec![doc! { "name": "Alice", "age": 30 }], "users")
//!     .await?;
//! let adults = store.find(&doc! { "age": { "$gte": 18 } }, "users").await?;
//! # Ok::<(), docmem_core::error::EngineError>(())
//! ```

use std::fmt::Debug;

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::{error::EngineResult, geo::GeoPoint};

/// Sort direction of one field inside an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    Ascending,
    Descending,
}

/// One field of an index declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    pub name: String,
    pub direction: IndexDirection,
}

impl IndexField {
    pub fn ascending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: IndexDirection::Ascending,
        }
    }

    pub fn descending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: IndexDirection::Descending,
        }
    }
}

/// Abstract interface for document storage backends.
///
/// Implementers own the authoritative per-collection document lists and any
/// indexes over them; the query, update, and aggregation semantics they must
/// provide are the ones defined by this crate's [`filter`](crate::filter),
/// [`update`](crate::update), and [`pipeline`](crate::pipeline) modules.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from
/// multiple async tasks; the exact locking model is implementation-specific.
///
/// # Error Handling
///
/// Operations return [`EngineResult<T>`](crate::error::EngineResult). Every
/// error variant is a local, recoverable decision for the caller; backends
/// never retry on their own.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts documents into a collection, creating it if needed.
    ///
    /// A document without an `_id` field is assigned a fresh `ObjectId`.
    /// Uniqueness is pre-validated across every unique index on the
    /// collection before any index is mutated, so a rejected batch leaves
    /// the collection untouched.
    ///
    /// # Returns
    ///
    /// The `_id` values of the inserted documents, in input order.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateKey`](crate::error::EngineError::DuplicateKey)
    /// naming the offending fields when a unique index would be violated.
    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> EngineResult<Vec<Bson>>;

    /// Applies an update document to every document matching `query`.
    ///
    /// Each match goes through the update engine; every index over the
    /// collection is re-bucketed with the (new, old) document pair.
    ///
    /// # Returns
    ///
    /// The number of documents updated.
    async fn update_documents(
        &self,
        query: &Document,
        update: &Document,
        collection: &str,
    ) -> EngineResult<usize>;

    /// Deletes every document matching `query`, returning the removed count.
    async fn delete_documents(&self, query: &Document, collection: &str) -> EngineResult<usize>;

    /// Finds all documents matching a query document.
    ///
    /// Backends are free to consult indexes to narrow the candidate set, but
    /// the result must be identical to filtering the full collection through
    /// the compiled query.
    async fn find(&self, query: &Document, collection: &str) -> EngineResult<Vec<Document>>;

    /// Counts the documents matching a query document.
    async fn count(&self, query: &Document, collection: &str) -> EngineResult<usize>;

    /// Runs an aggregation pipeline over a collection's documents.
    async fn aggregate(
        &self,
        stages: &[Document],
        collection: &str,
    ) -> EngineResult<Vec<Document>>;

    /// Proximity query against a geo-indexed field.
    ///
    /// Candidates matching the non-geo portion of `query` are ordered by
    /// ascending distance to the nearest of `targets` and truncated to
    /// `limit`. Planar distances carry no unit; spherical distances are in
    /// radians on the unit sphere.
    async fn geo_near(
        &self,
        collection: &str,
        field: &str,
        query: &Document,
        targets: Vec<GeoPoint>,
        limit: usize,
        spherical: bool,
    ) -> EngineResult<Vec<(f64, Document)>>;

    /// Declares an index over the given fields.
    ///
    /// Existing documents are bucketed immediately; with `unique` set, an
    /// existing key collision fails the declaration.
    ///
    /// # Returns
    ///
    /// The index name, derived from the field list (`"age_1_name_-1"` style).
    async fn create_index(
        &self,
        collection: &str,
        fields: Vec<IndexField>,
        unique: bool,
    ) -> EngineResult<String>;

    /// Declares a geo index over a coordinate field.
    async fn create_geo_index(&self, collection: &str, field: &str) -> EngineResult<String>;

    /// Drops an index by the name `create_index` returned.
    async fn drop_index(&self, collection: &str, name: &str) -> EngineResult<()>;

    /// Creates an empty collection; creating an existing one is a no-op.
    async fn create_collection(&self, name: &str) -> EngineResult<()>;

    /// Drops a collection, its documents, and its indexes.
    async fn drop_collection(&self, name: &str) -> EngineResult<()>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> EngineResult<Vec<String>>;
}
