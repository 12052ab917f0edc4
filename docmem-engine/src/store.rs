//! In-memory document store.
//!
//! [`MemoryStore`] is the authoritative owner of every document: each
//! collection keeps an insertion-ordered list of `Arc<Document>` handles, an
//! implicit unique `_id` index, and whatever secondary and geo indexes were
//! declared. Indexes share the store's document instances rather than copying
//! them; mutation goes through the store, which re-buckets every index with
//! the (new, old) document pair.
//!
//! # Concurrency
//!
//! The collection map sits behind an async read-write lock; each index
//! additionally serializes its own bucket mutations. Uniqueness across
//! several indexes is pre-validated with the check half of the check/commit
//! split before any index is mutated, so a rejected write leaves all indexes
//! untouched.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;

use docmem_core::{
    backend::{IndexField, StoreBackend},
    error::{EngineError, EngineResult},
    filter::Filter,
    geo::GeoPoint,
    pipeline, update,
};

use crate::{
    geo::GeoIndex,
    index::{Index, index_name},
};

#[derive(Debug)]
struct CollectionState {
    /// Documents in insertion order; the authoritative instances every index
    /// shares.
    documents: Vec<Arc<Document>>,
    indexes: Vec<Arc<Index>>,
    geo_indexes: Vec<Arc<GeoIndex>>,
}

impl CollectionState {
    fn new() -> Self {
        Self {
            documents: Vec::new(),
            // Every collection carries the implicit unique _id index.
            indexes: vec![Arc::new(Index::new(
                vec![IndexField::ascending("_id")],
                true,
            ))],
            geo_indexes: Vec::new(),
        }
    }
}

/// Thread-safe in-memory implementation of [`StoreBackend`].
///
/// `MemoryStore` is cloneable; clones share the same underlying collections.
///
/// # Example
///
/// ```ignore
/// use docmem_engine::MemoryStore;
/// use docmem_core::backend::StoreBackend;
/// use bson::doc;
///
/// let store = MemoryStore::new();
/// store
///     .insert_documents(vec![doc! { "name": "Alice" }], "users")
///     .await?;
/// assert_eq!(store.count(&doc! {}, "users").await?, 1);
/// # Ok::<(), docmem_core::error::EngineError>(())
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, CollectionState>>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> EngineResult<Vec<Bson>> {
        let mut collections = self.collections.write().await;
        let state = collections
            .entry(collection.to_string())
            .or_insert_with(CollectionState::new);

        let incoming: Vec<Arc<Document>> = documents
            .into_iter()
            .map(|mut doc| {
                if !doc.contains_key("_id") {
                    doc.insert("_id", ObjectId::new());
                }
                Arc::new(doc)
            })
            .collect();

        // Check phase: every document against every unique index, plus the
        // rest of the batch, before anything is committed.
        for (position, doc) in incoming.iter().enumerate() {
            for index in &state.indexes {
                let conflicts = index.check_add_or_update(doc, None).await;
                if !conflicts.is_empty() {
                    return Err(EngineError::DuplicateKey(conflicts));
                }
                if index.is_unique()
                    && incoming[..position]
                        .iter()
                        .any(|earlier| index.key_for(earlier) == index.key_for(doc))
                {
                    return Err(EngineError::DuplicateKey(index.field_names()));
                }
            }
        }

        let mut ids = Vec::with_capacity(incoming.len());
        for doc in incoming {
            for index in &state.indexes {
                index.add_or_update(Arc::clone(&doc), None).await?;
            }
            for geo in &state.geo_indexes {
                geo.add_or_update(Arc::clone(&doc), None).await;
            }
            ids.push(doc.get("_id").cloned().unwrap_or(Bson::Null));
            state.documents.push(doc);
        }

        Ok(ids)
    }

    async fn update_documents(
        &self,
        query: &Document,
        update: &Document,
        collection: &str,
    ) -> EngineResult<usize> {
        let filter = Filter::compile(query)?;
        let mut collections = self.collections.write().await;
        let state = collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;

        let mut updated = 0usize;
        for position in 0..state.documents.len() {
            let old = Arc::clone(&state.documents[position]);
            if !filter.matches(&old) {
                continue;
            }

            let mut replacement = (*old).clone();
            update::apply_update(&mut replacement, update)?;
            let replacement = Arc::new(replacement);

            for index in &state.indexes {
                let conflicts = index.check_add_or_update(&replacement, Some(&old)).await;
                if !conflicts.is_empty() {
                    return Err(EngineError::DuplicateKey(conflicts));
                }
            }

            for index in &state.indexes {
                index
                    .add_or_update(Arc::clone(&replacement), Some(&old))
                    .await?;
            }
            for geo in &state.geo_indexes {
                geo.add_or_update(Arc::clone(&replacement), Some(&old)).await;
            }

            state.documents[position] = replacement;
            updated += 1;
        }

        Ok(updated)
    }

    async fn delete_documents(&self, query: &Document, collection: &str) -> EngineResult<usize> {
        let filter = Filter::compile(query)?;
        let mut collections = self.collections.write().await;
        let state = collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;

        let mut kept = Vec::with_capacity(state.documents.len());
        let mut removed = Vec::new();
        for doc in state.documents.drain(..) {
            if filter.matches(&doc) {
                removed.push(doc);
            } else {
                kept.push(doc);
            }
        }
        state.documents = kept;

        for doc in &removed {
            for index in &state.indexes {
                index.remove(doc).await;
            }
            for geo in &state.geo_indexes {
                geo.remove(doc).await;
            }
        }

        Ok(removed.len())
    }

    async fn find(&self, query: &Document, collection: &str) -> EngineResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let state = collections
            .get(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;

        // A secondary index narrows the candidate set when it can answer the
        // query from a single bucket; correctness never depends on this.
        for index in &state.indexes {
            let names = index.field_names();
            if !names.is_empty()
                && names.iter().all(|name| {
                    query
                        .get(name)
                        .is_some_and(|v| !matches!(v, Bson::Document(d) if d.keys().any(|k| k.starts_with('$'))))
                })
            {
                let hits = index.retrieve(query).await?;
                return Ok(hits.iter().map(|doc| (**doc).clone()).collect());
            }
        }

        let filter = Filter::compile(query)?;
        Ok(state
            .documents
            .iter()
            .filter(|doc| filter.matches(doc))
            .map(|doc| (**doc).clone())
            .collect())
    }

    async fn count(&self, query: &Document, collection: &str) -> EngineResult<usize> {
        Ok(self.find(query, collection).await?.len())
    }

    async fn aggregate(
        &self,
        stages: &[Document],
        collection: &str,
    ) -> EngineResult<Vec<Document>> {
        let docs = {
            let collections = self.collections.read().await;
            let state = collections
                .get(collection)
                .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
            state
                .documents
                .iter()
                .map(|doc| (**doc).clone())
                .collect::<Vec<_>>()
        };

        pipeline::run(docs, stages)
    }

    async fn geo_near(
        &self,
        collection: &str,
        field: &str,
        query: &Document,
        targets: Vec<GeoPoint>,
        limit: usize,
        spherical: bool,
    ) -> EngineResult<Vec<(f64, Document)>> {
        let geo = {
            let collections = self.collections.read().await;
            let state = collections
                .get(collection)
                .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;
            state
                .geo_indexes
                .iter()
                .find(|geo| geo.field() == field)
                .cloned()
                .ok_or_else(|| EngineError::MalformedQuery {
                    path: field.to_string(),
                    reason: format!("no geo index on '{field}' in '{collection}'"),
                })?
        };

        let ranked = geo.geo_near(query, &targets, limit, spherical).await?;
        Ok(ranked
            .into_iter()
            .map(|(distance, doc)| (distance, (*doc).clone()))
            .collect())
    }

    async fn create_index(
        &self,
        collection: &str,
        fields: Vec<IndexField>,
        unique: bool,
    ) -> EngineResult<String> {
        let mut collections = self.collections.write().await;
        let state = collections
            .entry(collection.to_string())
            .or_insert_with(CollectionState::new);

        let name = index_name(&fields);
        if let Some(existing) = state.indexes.iter().find(|index| index.name() == name) {
            if existing.is_unique() != unique {
                return Err(EngineError::MalformedQuery {
                    path: name,
                    reason: "an index over these fields already exists with a different uniqueness constraint"
                        .to_string(),
                });
            }
            return Ok(name);
        }

        let index = Index::new(fields, unique);
        for doc in &state.documents {
            index.add_or_update(Arc::clone(doc), None).await?;
        }
        state.indexes.push(Arc::new(index));
        Ok(name)
    }

    async fn create_geo_index(&self, collection: &str, field: &str) -> EngineResult<String> {
        let mut collections = self.collections.write().await;
        let state = collections
            .entry(collection.to_string())
            .or_insert_with(CollectionState::new);

        if let Some(existing) = state.geo_indexes.iter().find(|geo| geo.field() == field) {
            return Ok(existing.name().to_string());
        }

        let geo = GeoIndex::new(field);
        for doc in &state.documents {
            geo.add_or_update(Arc::clone(doc), None).await;
        }
        let name = geo.name().to_string();
        state.geo_indexes.push(Arc::new(geo));
        Ok(name)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> EngineResult<()> {
        let mut collections = self.collections.write().await;
        let state = collections
            .get_mut(collection)
            .ok_or_else(|| EngineError::CollectionNotFound(collection.to_string()))?;

        if name == "_id_1" {
            return Err(EngineError::MalformedQuery {
                path: name.to_string(),
                reason: "the implicit _id index cannot be dropped".to_string(),
            });
        }

        state.indexes.retain(|index| index.name() != name);
        state.geo_indexes.retain(|geo| geo.name() != name);
        Ok(())
    }

    async fn create_collection(&self, name: &str) -> EngineResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(name.to_string())
            .or_insert_with(CollectionState::new);
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> EngineResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::CollectionNotFound(name.to_string()))
    }

    async fn list_collections(&self) -> EngineResult<Vec<String>> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
