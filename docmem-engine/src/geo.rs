//! Geohash-bucketed proximity index.
//!
//! A [`GeoIndex`] specializes key extraction: the indexed field must decode to
//! a coordinate pair, which is bucketed under its 5-character geohash. The
//! decoded point rides along with each document so `geo_near` never re-decodes
//! during distance ranking.

use std::{collections::BTreeMap, sync::Arc};

use bson::{Bson, Document};
use mea::mutex::Mutex;

use docmem_core::{
    error::EngineResult,
    filter::Filter,
    geo::{GEOHASH_PRECISION, GeoPoint},
    path,
};

/// Proximity index over one coordinate field of a collection.
#[derive(Debug)]
pub struct GeoIndex {
    name: String,
    field: String,
    segments: Vec<String>,
    buckets: Mutex<BTreeMap<String, Vec<(GeoPoint, Arc<Document>)>>>,
}

impl GeoIndex {
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            name: format!("{field}_2d"),
            segments: path::split(&field),
            field,
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Decodes the indexed field of a document into a coordinate pair.
    ///
    /// Documents without a decodable coordinate are simply not indexed.
    pub fn point_for(&self, doc: &Document) -> Option<GeoPoint> {
        path::resolve(&self.segments, doc)
            .first()
            .and_then(|value| GeoPoint::from_bson(value))
    }

    /// Buckets `doc` under its geohash, dropping `old`'s entry first.
    pub async fn add_or_update(&self, doc: Arc<Document>, old: Option<&Arc<Document>>) {
        let mut buckets = self.buckets.lock().await;

        if let Some(old) = old {
            remove_from(&mut buckets, old);
        }

        if let Some(point) = self.point_for(&doc) {
            let hash = point.geohash(GEOHASH_PRECISION);
            buckets.entry(hash).or_default().push((point, doc));
        }
    }

    pub async fn remove(&self, doc: &Arc<Document>) {
        let mut buckets = self.buckets.lock().await;
        remove_from(&mut buckets, doc);
    }

    /// Proximity query: candidates matching the non-geo portion of `query`
    /// are ranked by ascending distance to the nearest target and truncated
    /// to `limit`.
    ///
    /// Planar distance carries no unit; spherical distance is radians on the
    /// unit sphere.
    pub async fn geo_near(
        &self,
        query: &Document,
        targets: &[GeoPoint],
        limit: usize,
        spherical: bool,
    ) -> EngineResult<Vec<(f64, Arc<Document>)>> {
        let remainder = strip_geo_operators(query, &self.field);
        let filter = Filter::compile(&remainder)?;

        let buckets = self.buckets.lock().await;
        let mut ranked: Vec<(f64, Arc<Document>)> = buckets
            .values()
            .flatten()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(point, doc)| {
                let distance = targets
                    .iter()
                    .map(|target| {
                        if spherical {
                            point.spherical_distance(target)
                        } else {
                            point.planar_distance(target)
                        }
                    })
                    .fold(f64::INFINITY, f64::min);
                (distance, Arc::clone(doc))
            })
            .collect();

        ranked.sort_by(|(a, _), (b, _)| a.total_cmp(b));
        ranked.truncate(limit);
        Ok(ranked)
    }
}

/// Drops the `$near`/`$nearSphere` clause on the indexed field from a query,
/// leaving the remainder to evaluate per candidate.
fn strip_geo_operators(query: &Document, field: &str) -> Document {
    let mut remainder = Document::new();
    for (key, operand) in query.iter() {
        if key == field {
            if let Bson::Document(op_doc) = operand {
                if op_doc.keys().any(|op| op == "$near" || op == "$nearSphere") {
                    continue;
                }
            }
        }
        remainder.insert(key.clone(), operand.clone());
    }
    remainder
}

fn remove_from(
    buckets: &mut BTreeMap<String, Vec<(GeoPoint, Arc<Document>)>>,
    doc: &Arc<Document>,
) {
    buckets.retain(|_, bucket| {
        bucket.retain(|(_, held)| !Arc::ptr_eq(held, doc));
        !bucket.is_empty()
    });
}
