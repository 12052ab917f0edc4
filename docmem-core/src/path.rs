//! Dot-delimited field path resolution.
//!
//! Resolution walks a path against a document and yields every value the path
//! can reach. It never errors: an unresolvable path simply yields nothing.
//! When a non-terminal segment lands on an array whose next segment is not a
//! positional index, resolution fans out across the array's document elements,
//! reproducing the "query on an array matches if any element matches" rule.

use bson::{Bson, Document};

/// Splits a dot-delimited field path into its segments.
pub fn split(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// Resolves a field path against a document.
///
/// Returns every value reachable through the path; an empty result means
/// "not found". A terminal key whose value is `Null` still resolves (presence
/// and nullness are distinct).
pub fn resolve<'a>(segments: &[String], doc: &'a Document) -> Vec<&'a Bson> {
    let mut found = Vec::new();
    let Some((head, rest)) = segments.split_first() else {
        return found;
    };

    if let Some(value) = doc.get(head) {
        descend(value, rest, &mut found);
    }

    found
}

/// Convenience wrapper splitting `path` on dots before resolving.
pub fn resolve_str<'a>(path: &str, doc: &'a Document) -> Vec<&'a Bson> {
    resolve(&split(path), doc)
}

fn descend<'a>(value: &'a Bson, rest: &[String], found: &mut Vec<&'a Bson>) {
    let Some((head, tail)) = rest.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(sub) => {
            if let Some(next) = sub.get(head) {
                descend(next, tail, found);
            }
        }
        Bson::Array(elements) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = elements.get(index) {
                    descend(next, tail, found);
                }
            } else {
                // Fan out: resolve the remaining path against every document
                // element and concatenate the non-empty results.
                for element in elements {
                    if let Bson::Document(sub) = element {
                        if let Some(next) = sub.get(head) {
                            descend(next, tail, found);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}
