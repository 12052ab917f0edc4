//! Ordered and unique indexes over shared documents.
//!
//! An index owns a mapping from extracted keys (the projection of a document
//! onto the index's declared fields) to the documents sharing that key.
//! Documents are held as [`Arc<Document>`] handles; an index never clones a
//! document, it shares the store's instance. Each index serializes its own
//! mutations behind one async mutex; key buckets are never observed torn.

use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};

use bson::{Bson, Document};
use mea::mutex::Mutex;

use docmem_core::{
    backend::{IndexDirection, IndexField},
    error::{EngineError, EngineResult},
    filter::Filter,
    path, value,
};

/// The projection of a document onto an index's declared fields.
///
/// Ordering honors each field's declared direction over the engine's total
/// value order, so a `BTreeMap` keyed by `IndexKey` iterates in index order.
#[derive(Debug, Clone)]
pub struct IndexKey {
    values: Vec<Bson>,
    directions: Arc<Vec<IndexDirection>>,
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (i, (left, right)) in self.values.iter().zip(other.values.iter()).enumerate() {
            let mut ordering = value::total_cmp(left, right);
            if self.directions.get(i) == Some(&IndexDirection::Descending) {
                ordering = ordering.reverse();
            }
            if !ordering.is_eq() {
                return ordering;
            }
        }
        self.values.len().cmp(&other.values.len())
    }
}

/// A secondary (or the implicit `_id`) index over one collection.
#[derive(Debug)]
pub struct Index {
    name: String,
    fields: Vec<IndexField>,
    segments: Vec<Vec<String>>,
    directions: Arc<Vec<IndexDirection>>,
    unique: bool,
    buckets: Mutex<BTreeMap<IndexKey, Vec<Arc<Document>>>>,
}

impl Index {
    /// Creates an empty index over the given field declarations.
    pub fn new(fields: Vec<IndexField>, unique: bool) -> Self {
        let name = index_name(&fields);
        let segments = fields
            .iter()
            .map(|field| path::split(&field.name))
            .collect();
        let directions = Arc::new(fields.iter().map(|field| field.direction).collect());

        Self {
            name,
            fields,
            segments,
            directions,
            unique,
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// The declared key field names, in order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|field| field.name.clone()).collect()
    }

    /// Extracts this index's key from a document.
    ///
    /// Each field contributes its first resolved value, or `Null` when the
    /// path does not resolve.
    pub fn key_for(&self, doc: &Document) -> IndexKey {
        let values = self
            .segments
            .iter()
            .map(|segments| {
                path::resolve(segments, doc)
                    .first()
                    .map(|v| (*v).clone())
                    .unwrap_or(Bson::Null)
            })
            .collect();

        IndexKey {
            values,
            directions: Arc::clone(&self.directions),
        }
    }

    /// Reports the key fields that would conflict if `doc` were added,
    /// without mutating any state. An empty result means the add is safe.
    ///
    /// This is the check half of the check/commit split: callers wanting
    /// all-or-nothing semantics across several indexes run this against each
    /// one before committing any [`add_or_update`](Self::add_or_update).
    pub async fn check_add_or_update(
        &self,
        doc: &Arc<Document>,
        old: Option<&Arc<Document>>,
    ) -> Vec<String> {
        if !self.unique {
            return Vec::new();
        }

        let key = self.key_for(doc);
        let buckets = self.buckets.lock().await;

        match buckets.get(&key) {
            Some(bucket) if bucket.iter().any(|held| !is_same(held, doc, old)) => {
                self.field_names()
            }
            _ => Vec::new(),
        }
    }

    /// Inserts `doc` into its key bucket, first removing `old`'s mapping.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateKey`] when this is a unique index and the key
    /// already maps to a different document; state is left unchanged.
    pub async fn add_or_update(
        &self,
        doc: Arc<Document>,
        old: Option<&Arc<Document>>,
    ) -> EngineResult<()> {
        let key = self.key_for(&doc);
        let mut buckets = self.buckets.lock().await;

        if self.unique {
            if let Some(bucket) = buckets.get(&key) {
                if bucket.iter().any(|held| !is_same(held, &doc, old)) {
                    return Err(EngineError::DuplicateKey(self.field_names()));
                }
            }
        }

        if let Some(old) = old {
            remove_from(&mut buckets, self.key_for(old), old);
        }

        buckets.entry(key).or_default().push(doc);
        Ok(())
    }

    /// Removes `doc` from its key bucket, deleting the bucket when it
    /// becomes empty.
    pub async fn remove(&self, doc: &Arc<Document>) {
        let mut buckets = self.buckets.lock().await;
        remove_from(&mut buckets, self.key_for(doc), doc);
    }

    /// Retrieves the documents matching `query`, pruning by key bucket when
    /// the query fixes every indexed field with a literal equality.
    ///
    /// Pruning is purely an optimization: every candidate still runs through
    /// the full compiled filter, so the result is correct even when the whole
    /// key space is scanned. Buckets keyed by an array value are never pruned
    /// away, since a scalar query matches an array field by containment and
    /// the containing array lives under its own key.
    pub async fn retrieve(&self, query: &Document) -> EngineResult<Vec<Arc<Document>>> {
        let filter = Filter::compile(query)?;
        let buckets = self.buckets.lock().await;

        let candidates: Vec<Arc<Document>> = match self.exact_key(query) {
            Some(key) => buckets
                .iter()
                .filter(|(held, _)| **held == key || has_array_values(held))
                .flat_map(|(_, bucket)| bucket.iter().cloned())
                .collect(),
            None => buckets.values().flatten().cloned().collect(),
        };

        Ok(candidates
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect())
    }

    /// Builds a lookup key when the query pins every indexed field to a
    /// literal (a top-level non-operator, non-regex value).
    fn exact_key(&self, query: &Document) -> Option<IndexKey> {
        let values = self
            .fields
            .iter()
            .map(|field| match query.get(&field.name) {
                Some(literal) if is_literal(literal) => Some(literal.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;

        Some(IndexKey {
            values,
            directions: Arc::clone(&self.directions),
        })
    }
}

/// Derives the conventional index name from its field list, e.g.
/// `age_1_name_-1`.
pub fn index_name(fields: &[IndexField]) -> String {
    fields
        .iter()
        .map(|field| {
            let direction = match field.direction {
                IndexDirection::Ascending => "1",
                IndexDirection::Descending => "-1",
            };
            format!("{}_{direction}", field.name)
        })
        .collect::<Vec<_>>()
        .join("_")
}

fn is_literal(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => !doc.keys().any(|key| key.starts_with('$')),
        // A regex query value is a pattern search, not an equality pin.
        Bson::RegularExpression(_) => false,
        _ => true,
    }
}

fn has_array_values(key: &IndexKey) -> bool {
    key.values.iter().any(|value| matches!(value, Bson::Array(_)))
}

/// Identity check within a bucket: the held document is the one being added
/// or the one being replaced.
fn is_same(held: &Arc<Document>, doc: &Arc<Document>, old: Option<&Arc<Document>>) -> bool {
    Arc::ptr_eq(held, doc) || old.is_some_and(|old| Arc::ptr_eq(held, old))
}

fn remove_from(
    buckets: &mut BTreeMap<IndexKey, Vec<Arc<Document>>>,
    key: IndexKey,
    doc: &Arc<Document>,
) {
    if let Some(bucket) = buckets.get_mut(&key) {
        bucket.retain(|held| !Arc::ptr_eq(held, doc));
        if bucket.is_empty() {
            buckets.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn shared(doc: Document) -> Arc<Document> {
        Arc::new(doc)
    }

    #[tokio::test]
    async fn unique_index_rejects_second_key() {
        let index = Index::new(vec![IndexField::ascending("_id")], true);
        let first = shared(doc! { "_id": 1, "a": 1 });
        let second = shared(doc! { "_id": 1, "a": 2 });

        index.add_or_update(Arc::clone(&first), None).await.unwrap();

        let conflicts = index.check_add_or_update(&second, None).await;
        assert_eq!(conflicts, vec!["_id".to_string()]);

        let err = index.add_or_update(second, None).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey(fields) if fields == vec!["_id"]));
    }

    #[tokio::test]
    async fn update_rebuckets_without_self_conflict() {
        let index = Index::new(vec![IndexField::ascending("email")], true);
        let old = shared(doc! { "_id": 1, "email": "a@x" });
        index.add_or_update(Arc::clone(&old), None).await.unwrap();

        // Same key, same logical document: no conflict.
        let unchanged = shared(doc! { "_id": 1, "email": "a@x" });
        assert!(index.check_add_or_update(&unchanged, Some(&old)).await.is_empty());

        let moved = shared(doc! { "_id": 1, "email": "b@x" });
        index.add_or_update(Arc::clone(&moved), Some(&old)).await.unwrap();

        let hits = index.retrieve(&doc! { "email": "b@x" }).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(index.retrieve(&doc! { "email": "a@x" }).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retrieve_prunes_on_full_literal_match() {
        let index = Index::new(
            vec![IndexField::ascending("team"), IndexField::descending("rank")],
            false,
        );
        for doc in [
            doc! { "_id": 1, "team": "red", "rank": 1 },
            doc! { "_id": 2, "team": "red", "rank": 2 },
            doc! { "_id": 3, "team": "blue", "rank": 1 },
        ] {
            index.add_or_update(shared(doc), None).await.unwrap();
        }

        // All key fields pinned: exact bucket lookup.
        let exact = index
            .retrieve(&doc! { "team": "red", "rank": 1 })
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].get_i32("_id").unwrap(), 1);

        // Range predicate: falls back to scanning every bucket.
        let scanned = index
            .retrieve(&doc! { "rank": { "$gte": 1 } })
            .await
            .unwrap();
        assert_eq!(scanned.len(), 3);
    }

    #[tokio::test]
    async fn retrieve_matches_array_elements_despite_pruning() {
        let index = Index::new(vec![IndexField::ascending("tags")], false);
        index
            .add_or_update(shared(doc! { "_id": 1, "tags": ["a", "b"] }), None)
            .await
            .unwrap();
        index
            .add_or_update(shared(doc! { "_id": 2, "tags": "a" }), None)
            .await
            .unwrap();
        index
            .add_or_update(shared(doc! { "_id": 3, "tags": "b" }), None)
            .await
            .unwrap();

        // A scalar query matches the array-keyed document by containment even
        // though its bucket key is the whole array.
        let hits = index.retrieve(&doc! { "tags": "a" }).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|doc| doc.get_i32("_id").unwrap() != 3));
    }

    #[tokio::test]
    async fn regex_query_values_scan_instead_of_pruning() {
        let index = Index::new(vec![IndexField::ascending("sku")], false);
        for doc in [
            doc! { "_id": 1, "sku": "ab1" },
            doc! { "_id": 2, "sku": "ab2" },
            doc! { "_id": 3, "sku": "xy" },
        ] {
            index.add_or_update(shared(doc), None).await.unwrap();
        }

        let pattern = Bson::RegularExpression(bson::Regex {
            pattern: "^ab".try_into().unwrap(),
            options: "".try_into().unwrap(),
        });
        let hits = index.retrieve(&doc! { "sku": pattern }).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn remove_drops_empty_buckets() {
        let index = Index::new(vec![IndexField::ascending("k")], false);
        let doc = shared(doc! { "_id": 1, "k": 9 });
        index.add_or_update(Arc::clone(&doc), None).await.unwrap();
        index.remove(&doc).await;

        assert!(index.retrieve(&doc! { "k": 9 }).await.unwrap().is_empty());
        assert!(index.buckets.lock().await.is_empty());
    }

    #[test]
    fn names_follow_field_declarations() {
        let fields = vec![IndexField::ascending("age"), IndexField::descending("name")];
        assert_eq!(index_name(&fields), "age_1_name_-1");
        assert_eq!(Index::new(fields, false).name(), "age_1_name_-1");
    }

    #[test]
    fn missing_fields_key_as_null() {
        let index = Index::new(vec![IndexField::ascending("a"), IndexField::ascending("b")], false);
        let key = index.key_for(&doc! { "a": 1 });
        assert_eq!(key.values, vec![Bson::Int32(1), Bson::Null]);
    }
}
