//! Type-aware comparison rules for BSON values.
//!
//! This module defines the equality, ordering, and type-classification rules
//! that every operator in the engine leans on. Values only compare within the
//! same broad type family (all numeric subtypes cross-compare); values of
//! incomparable families have no defined order and callers must treat that as
//! "no match", never as an error.

use std::cmp::Ordering;

use bson::Bson;

/// Broad type family of a BSON value.
///
/// Comparison operators are only defined within one family; `Number` spans
/// `Int32`, `Int64` and `Double`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Null,
    Number,
    String,
    Document,
    Array,
    ObjectId,
    Bool,
    DateTime,
    Regex,
    /// Variants the engine does not define comparison for (binary, timestamps, ...).
    Other,
}

impl TypeFamily {
    /// Rank used by [`total_cmp`] to order values of different families.
    fn rank(self) -> u8 {
        match self {
            TypeFamily::Null => 0,
            TypeFamily::Number => 1,
            TypeFamily::String => 2,
            TypeFamily::Document => 3,
            TypeFamily::Array => 4,
            TypeFamily::ObjectId => 5,
            TypeFamily::Bool => 6,
            TypeFamily::DateTime => 7,
            TypeFamily::Regex => 8,
            TypeFamily::Other => 9,
        }
    }
}

/// Classifies a BSON value into its broad type family.
pub fn family(value: &Bson) -> TypeFamily {
    match value {
        Bson::Null => TypeFamily::Null,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => TypeFamily::Number,
        Bson::String(_) => TypeFamily::String,
        Bson::Document(_) => TypeFamily::Document,
        Bson::Array(_) => TypeFamily::Array,
        Bson::ObjectId(_) => TypeFamily::ObjectId,
        Bson::Boolean(_) => TypeFamily::Bool,
        Bson::DateTime(_) => TypeFamily::DateTime,
        Bson::RegularExpression(_) => TypeFamily::Regex,
        _ => TypeFamily::Other,
    }
}

/// Short human-readable name of a value's shape, used in error messages.
pub fn shape_name(value: &Bson) -> &'static str {
    match family(value) {
        TypeFamily::Null => "null",
        TypeFamily::Number => "number",
        TypeFamily::String => "string",
        TypeFamily::Document => "document",
        TypeFamily::Array => "array",
        TypeFamily::ObjectId => "objectid",
        TypeFamily::Bool => "bool",
        TypeFamily::DateTime => "date",
        TypeFamily::Regex => "regex",
        TypeFamily::Other => "unsupported",
    }
}

/// Numeric view of a value, if it is a number.
pub fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// BSON type code for `$type` queries.
///
/// Codes follow the wire-format numbering: 1 double, 2 string, 3 document,
/// 4 array, 7 objectid, 8 bool, 9 date, 10 null, 11 regex, 16 int32, 18 int64.
pub fn type_code(value: &Bson) -> Option<i32> {
    match value {
        Bson::Double(_) => Some(1),
        Bson::String(_) => Some(2),
        Bson::Document(_) => Some(3),
        Bson::Array(_) => Some(4),
        Bson::ObjectId(_) => Some(7),
        Bson::Boolean(_) => Some(8),
        Bson::DateTime(_) => Some(9),
        Bson::Null => Some(10),
        Bson::RegularExpression(_) => Some(11),
        Bson::Int32(_) => Some(16),
        Bson::Int64(_) => Some(18),
        _ => None,
    }
}

/// Structural, type-aware equality.
///
/// Numbers compare across subtypes (`Int32(3) == Double(3.0)`), document
/// equality ignores key insertion order, and array equality is elementwise.
pub fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (left, right) {
        (Bson::Null, Bson::Null) => true,
        (Bson::Boolean(a), Bson::Boolean(b)) => a == b,
        (Bson::String(a), Bson::String(b)) => a == b,
        (Bson::ObjectId(a), Bson::ObjectId(b)) => a == b,
        (Bson::DateTime(a), Bson::DateTime(b)) => a == b,
        (Bson::RegularExpression(a), Bson::RegularExpression(b)) => {
            a.pattern == b.pattern && a.options == b.options
        }
        (Bson::Array(a), Bson::Array(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|(x, y)| values_equal(x, y))
        }
        (Bson::Document(a), Bson::Document(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, value)| {
                        b.get(key).is_some_and(|other| values_equal(value, other))
                    })
        }
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// Orders two values within their shared type family.
///
/// Returns `None` when the values belong to different families (except
/// numbers, which cross-compare) or when the family has no defined order.
/// Document comparison walks the *left* operand's keys in order, so a query
/// document drives the comparison when matching against stored values;
/// arrays compare by length first, then elementwise.
pub fn compare(left: &Bson, right: &Bson) -> Option<Ordering> {
    match (left, right) {
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::ObjectId(a), Bson::ObjectId(b)) => Some(a.bytes().cmp(&b.bytes())),
        (Bson::DateTime(a), Bson::DateTime(b)) => Some(a.cmp(b)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        (Bson::Array(a), Bson::Array(b)) => {
            match a.len().cmp(&b.len()) {
                Ordering::Equal => {
                    for (x, y) in a.iter().zip(b.iter()) {
                        match compare(x, y)? {
                            Ordering::Equal => continue,
                            other => return Some(other),
                        }
                    }
                    Some(Ordering::Equal)
                }
                other => Some(other),
            }
        }
        (Bson::Document(a), Bson::Document(b)) => {
            for (key, value) in a.iter() {
                let other = b.get(key)?;
                match compare(value, other)? {
                    Ordering::Equal => continue,
                    decided => return Some(decided),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }
}

/// Total order over arbitrary values, used for sorting and index bucketing.
///
/// Values of different families order by a fixed family rank; values within a
/// family fall back to [`compare`], with incomparable pairs treated as equal
/// so the ordering stays total.
pub fn total_cmp(left: &Bson, right: &Bson) -> Ordering {
    let (lf, rf) = (family(left), family(right));

    if lf != rf {
        return lf.rank().cmp(&rf.rank());
    }

    compare(left, right).unwrap_or(Ordering::Equal)
}

/// Adds a numeric delta to an existing numeric value with type promotion.
///
/// If either operand is floating point the result is a `Double`; otherwise the
/// result keeps the existing value's width (`Int32` stays 32-bit, anything
/// else widens to `Int64`). Returns `None` when either operand is non-numeric.
pub fn numeric_add(existing: &Bson, delta: &Bson) -> Option<Bson> {
    match (existing, delta) {
        (Bson::Double(_), _) | (_, Bson::Double(_)) => {
            Some(Bson::Double(as_number(existing)? + as_number(delta)?))
        }
        (Bson::Int32(a), Bson::Int32(b)) => Some(Bson::Int32(a.wrapping_add(*b))),
        (Bson::Int32(a), Bson::Int64(b)) => Some(Bson::Int32(a.wrapping_add(*b as i32))),
        (Bson::Int64(a), Bson::Int32(b)) => Some(Bson::Int64(a.wrapping_add(*b as i64))),
        (Bson::Int64(a), Bson::Int64(b)) => Some(Bson::Int64(a.wrapping_add(*b))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};

    #[test]
    fn numbers_compare_across_subtypes() {
        assert!(values_equal(&Bson::Int32(3), &Bson::Double(3.0)));
        assert!(values_equal(&Bson::Int64(7), &Bson::Int32(7)));
        assert_eq!(
            compare(&Bson::Int32(2), &Bson::Double(2.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn incomparable_families_have_no_order() {
        assert_eq!(compare(&bson!("a"), &Bson::Int32(1)), None);
        assert_eq!(compare(&bson!(true), &bson!("true")), None);
    }

    #[test]
    fn document_equality_ignores_key_order() {
        let a = bson!({ "x": 1, "y": 2 });
        let b = bson!({ "y": 2, "x": 1 });
        assert!(values_equal(&a, &b));
        assert!(!values_equal(&a, &bson!({ "x": 1 })));
    }

    #[test]
    fn arrays_compare_by_length_then_elements() {
        assert_eq!(
            compare(&bson!([1, 2]), &bson!([1, 2, 3])),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare(&bson!([1, 5]), &bson!([1, 2])),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare(&bson!([1, 2]), &bson!([1, 2])),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn document_comparison_follows_left_key_order() {
        let query = doc! { "a": 1, "b": 9 };
        let stored = doc! { "b": 0, "a": 1 };
        assert_eq!(
            compare(&Bson::Document(query), &Bson::Document(stored)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn total_order_ranks_families() {
        assert_eq!(total_cmp(&Bson::Null, &Bson::Int32(0)), Ordering::Less);
        assert_eq!(total_cmp(&bson!("z"), &bson!([1])), Ordering::Less);
        assert_eq!(total_cmp(&bson!(5), &bson!(5.0)), Ordering::Equal);
    }

    #[test]
    fn numeric_add_promotes() {
        assert_eq!(
            numeric_add(&Bson::Double(3.1), &Bson::Int32(5)),
            Some(Bson::Double(8.1))
        );
        assert_eq!(
            numeric_add(&Bson::Int32(1), &Bson::Int32(5)),
            Some(Bson::Int32(6))
        );
        assert_eq!(
            numeric_add(&Bson::Int64(1), &Bson::Int32(5)),
            Some(Bson::Int64(6))
        );
        assert_eq!(numeric_add(&bson!("x"), &Bson::Int32(1)), None);
    }

    #[test]
    fn datetimes_order_chronologically() {
        use chrono::TimeZone;

        let early = Bson::DateTime(bson::DateTime::from_chrono(
            chrono::Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        ));
        let late = Bson::DateTime(bson::DateTime::from_chrono(
            chrono::Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));

        assert_eq!(compare(&early, &late), Some(Ordering::Less));
        assert!(values_equal(&early, &early.clone()));
        assert_eq!(compare(&early, &bson!(0)), None);
    }

    #[test]
    fn type_codes_match_wire_numbering() {
        assert_eq!(type_code(&Bson::Double(1.0)), Some(1));
        assert_eq!(type_code(&bson!("s")), Some(2));
        assert_eq!(type_code(&bson!({})), Some(3));
        assert_eq!(type_code(&bson!([])), Some(4));
        assert_eq!(type_code(&Bson::Boolean(true)), Some(8));
        assert_eq!(type_code(&Bson::Null), Some(10));
        assert_eq!(type_code(&Bson::Int32(1)), Some(16));
        assert_eq!(type_code(&Bson::Int64(1)), Some(18));
    }
}
