//! Map/reduce host boundary.
//!
//! The engine never interprets map or reduce programs; a host (an embedded
//! scripting runtime, a native closure, anything) implements [`MapReduceHost`]
//! and the engine only feeds documents in and writes results back out.

use bson::{Bson, Document, doc};

use docmem_core::{error::EngineResult, value::values_equal};

/// A host capable of running map and reduce programs over documents.
pub trait MapReduceHost {
    /// Runs the map program over one document, producing zero or more
    /// `(key, value)` emissions.
    fn map(&self, doc: &Document, program: &str) -> EngineResult<Vec<(Bson, Bson)>>;

    /// Reduces all values emitted under one key to a single value.
    fn reduce(&self, key: &Bson, values: &[Bson], program: &str) -> EngineResult<Bson>;
}

/// Runs a map/reduce job over a document list.
///
/// Emissions group by structural key equality in first-seen order; each group
/// is reduced and written back as `{ _id: key, value: reduced }`.
pub fn run_map_reduce<H: MapReduceHost>(
    docs: &[Document],
    host: &H,
    map_program: &str,
    reduce_program: &str,
) -> EngineResult<Vec<Document>> {
    let mut groups: Vec<(Bson, Vec<Bson>)> = Vec::new();

    for doc in docs {
        for (key, value) in host.map(doc, map_program)? {
            match groups.iter_mut().find(|(existing, _)| values_equal(existing, &key)) {
                Some((_, values)) => values.push(value),
                None => groups.push((key, vec![value])),
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, values)| {
            let reduced = host.reduce(&key, &values, reduce_program)?;
            Ok(doc! { "_id": key, "value": reduced })
        })
        .collect()
}
