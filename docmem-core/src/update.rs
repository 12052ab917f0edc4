//! Atomic update operator application.
//!
//! An update document either replaces the target document wholesale (when it
//! carries no `$`-prefixed keys) or dispatches each `$operator` to a handler.
//! Within one application a field path may be written by at most one operator;
//! a second write to the same path is an atomic update conflict. Dot paths
//! descend through (and create) intermediate documents, never arrays.

use std::collections::HashSet;

use bson::{Bson, Document};

use crate::{
    error::{EngineError, EngineResult},
    path,
    value::{self, values_equal},
};

/// Applies an update document to `doc` in place.
///
/// # Errors
///
/// - [`EngineError::MalformedQuery`] for unknown operators or non-document
///   operator arguments.
/// - [`EngineError::AtomicUpdateConflict`] when two operators target the same
///   field path.
/// - [`EngineError::InvalidSubfieldPath`] when a dot path descends through a
///   non-document value.
/// - [`EngineError::TypeMismatch`] when an operator's target has the wrong
///   shape (e.g. `$inc` on a string).
pub fn apply_update(doc: &mut Document, update: &Document) -> EngineResult<()> {
    let has_operators = update.keys().any(|key| key.starts_with('$'));

    if !has_operators {
        replace(doc, update);
        return Ok(());
    }

    let mut touched = HashSet::new();

    for (op, arg) in update.iter() {
        let Bson::Document(targets) = arg else {
            return Err(EngineError::MalformedQuery {
                path: op.clone(),
                reason: format!("update operator expects a document argument, found {}", value::shape_name(arg)),
            });
        };

        for (field, operand) in targets.iter() {
            if !touched.insert(field.clone()) {
                return Err(EngineError::AtomicUpdateConflict(field.clone()));
            }
            apply_operator(doc, op, field, operand)?;
        }
    }

    Ok(())
}

/// Replacement semantics: every field except `_id` is dropped, then the
/// update's fields are merged in (its `_id`, if any, is ignored).
fn replace(doc: &mut Document, update: &Document) {
    let mut replaced = Document::new();

    if let Some(id) = doc.get("_id") {
        replaced.insert("_id", id.clone());
    }
    for (key, val) in update.iter() {
        if key != "_id" {
            replaced.insert(key.clone(), val.clone());
        }
    }

    *doc = replaced;
}

fn apply_operator(doc: &mut Document, op: &str, field: &str, operand: &Bson) -> EngineResult<()> {
    match op {
        "$set" => {
            let parent = locate(doc, field, true)?;
            if let Some((parent, key)) = parent {
                parent.insert(key, operand.clone());
            }
            Ok(())
        }
        "$inc" => apply_inc(doc, field, operand),
        "$unset" => {
            if let Some((parent, key)) = locate(doc, field, false)? {
                parent.remove(&key);
            }
            Ok(())
        }
        "$push" => apply_push(doc, field, operand),
        "$pull" => apply_pull(doc, field, operand),
        "$pop" => apply_pop(doc, field, operand),
        "$bit" => apply_bit(doc, field, operand),
        _ => Err(EngineError::MalformedQuery {
            path: field.to_string(),
            reason: format!("unknown update operator '{op}'"),
        }),
    }
}

fn apply_inc(doc: &mut Document, field: &str, operand: &Bson) -> EngineResult<()> {
    if value::as_number(operand).is_none() {
        return Err(EngineError::TypeMismatch {
            field: field.to_string(),
            expected: "number",
            found: value::shape_name(operand),
        });
    }

    let Some((parent, key)) = locate(doc, field, true)? else {
        return Ok(());
    };

    let incremented = match parent.get(&key) {
        // An absent field adopts the operand's numeric type.
        None => operand.clone(),
        Some(existing) => value::numeric_add(existing, operand).ok_or_else(|| {
            EngineError::TypeMismatch {
                field: field.to_string(),
                expected: "number",
                found: value::shape_name(existing),
            }
        })?,
    };

    parent.insert(key, incremented);
    Ok(())
}

fn apply_push(doc: &mut Document, field: &str, operand: &Bson) -> EngineResult<()> {
    let Some((parent, key)) = locate(doc, field, true)? else {
        return Ok(());
    };

    match parent.get_mut(&key) {
        Some(Bson::Array(elements)) => {
            elements.push(operand.clone());
            Ok(())
        }
        Some(existing) => Err(EngineError::TypeMismatch {
            field: field.to_string(),
            expected: "array",
            found: value::shape_name(existing),
        }),
        None => {
            parent.insert(key, Bson::Array(vec![operand.clone()]));
            Ok(())
        }
    }
}

fn apply_pull(doc: &mut Document, field: &str, operand: &Bson) -> EngineResult<()> {
    let Some((parent, key)) = locate(doc, field, false)? else {
        return Ok(());
    };

    match parent.get_mut(&key) {
        Some(Bson::Array(elements)) => {
            elements.retain(|element| !values_equal(element, operand));
            Ok(())
        }
        Some(existing) => Err(EngineError::TypeMismatch {
            field: field.to_string(),
            expected: "array",
            found: value::shape_name(existing),
        }),
        None => Ok(()),
    }
}

fn apply_pop(doc: &mut Document, field: &str, operand: &Bson) -> EngineResult<()> {
    let from_front = match value::as_number(operand) {
        Some(n) if n == -1.0 => true,
        Some(n) if n == 1.0 => false,
        _ => {
            return Err(EngineError::MalformedQuery {
                path: field.to_string(),
                reason: "$pop expects 1 (last) or -1 (first)".to_string(),
            });
        }
    };

    let Some((parent, key)) = locate(doc, field, false)? else {
        return Ok(());
    };

    match parent.get_mut(&key) {
        Some(Bson::Array(elements)) => {
            if !elements.is_empty() {
                if from_front {
                    elements.remove(0);
                } else {
                    elements.pop();
                }
            }
            Ok(())
        }
        Some(existing) => Err(EngineError::TypeMismatch {
            field: field.to_string(),
            expected: "array",
            found: value::shape_name(existing),
        }),
        None => Ok(()),
    }
}

fn apply_bit(doc: &mut Document, field: &str, operand: &Bson) -> EngineResult<()> {
    let Bson::Document(spec) = operand else {
        return Err(EngineError::MalformedQuery {
            path: field.to_string(),
            reason: "$bit expects {and: n} or {or: n}".to_string(),
        });
    };

    let Some((parent, key)) = locate(doc, field, true)? else {
        return Ok(());
    };

    // Absent targets start from zero, like $inc.
    let existing = parent.get(&key).cloned().unwrap_or(Bson::Int32(0));
    let mut bits = match existing {
        Bson::Int32(n) => n as i64,
        Bson::Int64(n) => n,
        other => {
            return Err(EngineError::TypeMismatch {
                field: field.to_string(),
                expected: "integer",
                found: value::shape_name(&other),
            });
        }
    };

    for (mode, mask) in spec.iter() {
        let Some(mask) = value::as_number(mask) else {
            return Err(EngineError::MalformedQuery {
                path: field.to_string(),
                reason: "$bit mask must be an integer".to_string(),
            });
        };
        match mode.as_str() {
            "and" => bits &= mask as i64,
            "or" => bits |= mask as i64,
            other => {
                return Err(EngineError::MalformedQuery {
                    path: field.to_string(),
                    reason: format!("unknown $bit mode '{other}'"),
                });
            }
        }
    }

    let updated = match existing {
        Bson::Int64(_) => Bson::Int64(bits),
        _ => Bson::Int32(bits as i32),
    };
    parent.insert(key, updated);
    Ok(())
}

/// Walks a dot path to the document owning its terminal segment.
///
/// With `create` set, absent intermediate documents are created along the way;
/// otherwise an absent intermediate resolves to `None` (the operator no-ops).
/// A present intermediate that is not a document is a fatal path error.
fn locate<'a>(
    doc: &'a mut Document,
    field: &str,
    create: bool,
) -> EngineResult<Option<(&'a mut Document, String)>> {
    let segments = path::split(field);
    let Some((last, intermediate)) = segments.split_last() else {
        return Ok(None);
    };

    let mut current = doc;
    for segment in intermediate {
        match current.get(segment) {
            Some(Bson::Document(_)) => {}
            Some(_) => return Err(EngineError::InvalidSubfieldPath(field.to_string())),
            None => {
                if !create {
                    return Ok(None);
                }
                current.insert(segment.clone(), Document::new());
            }
        }

        current = match current.get_mut(segment) {
            Some(Bson::Document(next)) => next,
            _ => return Err(EngineError::InvalidSubfieldPath(field.to_string())),
        };
    }

    Ok(Some((current, last.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{Bson, doc};

    #[test]
    fn replacement_preserves_id() {
        let mut doc = doc! { "_id": 7, "name": "old", "extra": true };
        apply_update(&mut doc, &doc! { "name": "new", "_id": 99 }).unwrap();
        assert_eq!(doc, doc! { "_id": 7, "name": "new" });
    }

    #[test]
    fn set_creates_nested_documents() {
        let mut doc = doc! {};
        apply_update(&mut doc, &doc! { "$set": { "a.b.c": 1 } }).unwrap();
        assert_eq!(doc, doc! { "a": { "b": { "c": 1 } } });
    }

    #[test]
    fn set_through_scalar_is_invalid_path() {
        let mut doc = doc! { "a": 5 };
        let err = apply_update(&mut doc, &doc! { "$set": { "a.b": 1 } }).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSubfieldPath(path) if path == "a.b"));
    }

    #[test]
    fn same_path_twice_is_a_conflict() {
        let mut doc = doc! { "a": 1 };
        let err = apply_update(&mut doc, &doc! { "$set": { "a": 1 }, "$inc": { "a": 1 } })
            .unwrap_err();
        assert!(matches!(err, EngineError::AtomicUpdateConflict(path) if path == "a"));
    }

    #[test]
    fn inc_promotes_to_double() {
        let mut doc = doc! { "a": 3.1 };
        apply_update(&mut doc, &doc! { "$inc": { "a": 5 } }).unwrap();
        assert_eq!(doc.get("a"), Some(&Bson::Double(8.1)));
    }

    #[test]
    fn inc_keeps_int32_width() {
        let mut doc = doc! { "a": Bson::Int32(1) };
        apply_update(&mut doc, &doc! { "$inc": { "a": Bson::Int32(5) } }).unwrap();
        assert_eq!(doc.get("a"), Some(&Bson::Int32(6)));
    }

    #[test]
    fn inc_on_missing_field_adopts_operand() {
        let mut doc = doc! {};
        apply_update(&mut doc, &doc! { "$inc": { "a": Bson::Int64(5) } }).unwrap();
        assert_eq!(doc.get("a"), Some(&Bson::Int64(5)));
    }

    #[test]
    fn inc_on_non_number_is_type_mismatch() {
        let mut doc = doc! { "a": "text" };
        let err = apply_update(&mut doc, &doc! { "$inc": { "a": 1 } }).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { field, .. } if field == "a"));
    }

    #[test]
    fn unset_removes_and_ignores_missing() {
        let mut doc = doc! { "a": 1, "b": 2 };
        apply_update(&mut doc, &doc! { "$unset": { "a": 1, "missing.path": 1 } }).unwrap();
        assert_eq!(doc, doc! { "b": 2 });
    }

    #[test]
    fn push_appends_or_creates() {
        let mut doc = doc! { "tags": ["a"] };
        apply_update(&mut doc, &doc! { "$push": { "tags": "b", "fresh": 1 } }).unwrap();
        assert_eq!(doc, doc! { "tags": ["a", "b"], "fresh": [1] });

        let err = apply_update(&mut doc! { "tags": 3 }, &doc! { "$push": { "tags": "x" } })
            .unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { .. }));
    }

    #[test]
    fn pull_removes_every_equal_element() {
        let mut doc = doc! { "n": [1, 2, 1, 3] };
        apply_update(&mut doc, &doc! { "$pull": { "n": 1 } }).unwrap();
        assert_eq!(doc, doc! { "n": [2, 3] });
    }

    #[test]
    fn pop_trims_either_end() {
        let mut doc = doc! { "n": [1, 2, 3] };
        apply_update(&mut doc, &doc! { "$pop": { "n": 1 } }).unwrap();
        assert_eq!(doc, doc! { "n": [1, 2] });
        apply_update(&mut doc, &doc! { "$pop": { "n": -1 } }).unwrap();
        assert_eq!(doc, doc! { "n": [2] });
    }

    #[test]
    fn bit_masks_preserve_width() {
        let mut doc = doc! { "flags": Bson::Int32(0b1010) };
        apply_update(&mut doc, &doc! { "$bit": { "flags": { "or": 0b0001 } } }).unwrap();
        assert_eq!(doc.get("flags"), Some(&Bson::Int32(0b1011)));

        let mut doc = doc! { "flags": Bson::Int64(0b1111) };
        apply_update(&mut doc, &doc! { "$bit": { "flags": { "and": 0b0110 } } }).unwrap();
        assert_eq!(doc.get("flags"), Some(&Bson::Int64(0b0110)));
    }

    #[test]
    fn unknown_operator_is_malformed() {
        let mut doc = doc! {};
        let err = apply_update(&mut doc, &doc! { "$rename": { "a": "b" } }).unwrap_err();
        assert!(matches!(err, EngineError::MalformedQuery { .. }));
    }
}
