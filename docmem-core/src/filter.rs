//! Query compilation and predicate evaluation.
//!
//! A query document compiles into a [`Filter`]: an immutable tree of
//! `And`/`Or`/`Not` combinators over leaf predicates, reusable across any
//! number of documents. Compilation is a recursive descent over the query
//! document; operator keywords dispatch through one flat match rather than a
//! class hierarchy. Evaluation is infallible and fails closed: a comparison
//! between incomparable values is simply "no match".

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::cmp::Ordering;

use bson::{Bson, Document};
use regex::{Regex, RegexBuilder};

use crate::{
    error::{EngineError, EngineResult},
    geo::GeoPoint,
    path,
    value::{self, values_equal},
};

/// Maximum candidates a `$near`/`$nearSphere` predicate will accept before
/// reporting "no match" for everything else.
pub const DEFAULT_NEAR_LIMIT: usize = 100;

/// Ordering comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A compiled, reusable predicate over documents.
#[derive(Debug)]
pub enum Filter {
    /// All sub-filters must match.
    And(Vec<Filter>),
    /// Any sub-filter may match.
    Or(Vec<Filter>),
    /// Inverts the sub-filter.
    Not(Box<Filter>),
    /// A predicate applied at a resolved field path.
    Leaf {
        /// Pre-split dot path segments.
        path: Vec<String>,
        /// The leaf predicate.
        predicate: Predicate,
    },
}

/// Leaf predicate applied to the values a field path resolves to.
#[derive(Debug)]
pub enum Predicate {
    /// Literal equality; also matches array fields containing the literal.
    Eq(Bson),
    /// Ordered comparison within a type family.
    Cmp(CmpOp, Bson),
    /// No resolved value (or element) equals the operand.
    Ne(Bson),
    /// Any resolved value (or element) is one of the operands.
    In(Vec<Bson>),
    /// No resolved value (or element) is one of the operands.
    Nin(Vec<Bson>),
    /// Every operand appears in the stored array.
    All(Vec<Bson>),
    /// Field presence equals the operand.
    Exists(bool),
    /// `(stored mod divisor) == remainder`.
    Mod { divisor: i64, remainder: i64 },
    /// Stored array length equals the operand.
    Size(i64),
    /// Pattern search against string values or string array elements.
    Regex(Regex),
    /// Stored array contains a document element matching the sub-filter.
    ElemMatch(Box<Filter>),
    /// BSON type code match.
    Type(i32),
    /// Geo proximity acceptance, capped by an internal counter.
    Near(NearPredicate),
}

/// State of a `$near`/`$nearSphere` predicate.
///
/// True distance ordering happens in the geo index; as a plain filter the
/// predicate accepts any candidate with a decodable coordinate until the cap
/// is reached, then rejects everything.
#[derive(Debug)]
pub struct NearPredicate {
    /// Proximity targets; candidates measure against the nearest one.
    pub targets: Vec<GeoPoint>,
    /// Great-circle distance when true, planar otherwise.
    pub spherical: bool,
    cap: usize,
    seen: AtomicUsize,
}

impl NearPredicate {
    fn new(targets: Vec<GeoPoint>, spherical: bool) -> Self {
        Self {
            targets,
            spherical,
            cap: DEFAULT_NEAR_LIMIT,
            seen: AtomicUsize::new(0),
        }
    }

    fn accept(&self) -> bool {
        self.seen.fetch_add(1, AtomicOrdering::Relaxed) < self.cap
    }
}

const RECOGNIZED_OPERATORS: &[&str] = &[
    "$lt", "$lte", "$gt", "$gte", "$ne", "$in", "$nin", "$all", "$exists", "$mod", "$size",
    "$not", "$regex", "$type", "$near", "$nearSphere", "$elemMatch",
];

impl Filter {
    /// Compiles a query document into a reusable filter.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedQuery`] for unknown operators, operands
    /// of the wrong shape, or operator documents combining more than two
    /// recognized operators.
    pub fn compile(query: &Document) -> EngineResult<Filter> {
        let mut clauses = Vec::with_capacity(query.len());

        for (key, operand) in query.iter() {
            match key.as_str() {
                "$and" => clauses.push(Filter::And(Self::compile_branches(key, operand)?)),
                "$or" => clauses.push(Filter::Or(Self::compile_branches(key, operand)?)),
                _ => clauses.push(Self::compile_field(key, operand)?),
            }
        }

        if clauses.len() == 1 {
            Ok(clauses.pop().unwrap_or(Filter::And(Vec::new())))
        } else {
            Ok(Filter::And(clauses))
        }
    }

    /// Evaluates this filter against a document.
    ///
    /// Never errors: incomparable values and unresolvable paths count as
    /// non-matching.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Filter::Not(filter) => !filter.matches(doc),
            Filter::Leaf { path, predicate } => {
                predicate.matches(&path::resolve(path, doc))
            }
        }
    }

    fn compile_branches(keyword: &str, operand: &Bson) -> EngineResult<Vec<Filter>> {
        let Bson::Array(branches) = operand else {
            return Err(EngineError::MalformedQuery {
                path: keyword.to_string(),
                reason: "expected an array of sub-queries".to_string(),
            });
        };

        branches
            .iter()
            .map(|branch| match branch {
                Bson::Document(sub) => Self::compile(sub),
                other => Err(EngineError::MalformedQuery {
                    path: keyword.to_string(),
                    reason: format!("sub-query must be a document, found {}", value::shape_name(other)),
                }),
            })
            .collect()
    }

    fn compile_field(field: &str, operand: &Bson) -> EngineResult<Filter> {
        let segments = path::split(field);

        match operand {
            Bson::Document(op_doc) => Self::compile_operator_document(field, segments, op_doc),
            Bson::RegularExpression(raw) => Ok(Filter::Leaf {
                path: segments,
                predicate: Predicate::Regex(build_regex(
                    field,
                    raw.pattern.as_str(),
                    raw.options.as_str(),
                )?),
            }),
            literal => Ok(Filter::Leaf {
                path: segments,
                predicate: Predicate::Eq(literal.clone()),
            }),
        }
    }

    fn compile_operator_document(
        field: &str,
        segments: Vec<String>,
        op_doc: &Document,
    ) -> EngineResult<Filter> {
        let has_operator_keys = op_doc.keys().any(|key| key.starts_with('$'));

        // Zero recognized operators: the sub-document is a literal-equality target.
        if !has_operator_keys {
            return Ok(Filter::Leaf {
                path: segments,
                predicate: Predicate::Eq(Bson::Document(op_doc.clone())),
            });
        }

        let mut recognized = 0usize;
        for key in op_doc.keys() {
            if key == "$options" {
                continue; // Companion to $regex, not an operator of its own.
            }
            if !RECOGNIZED_OPERATORS.contains(&key.as_str()) {
                return Err(EngineError::MalformedQuery {
                    path: field.to_string(),
                    reason: format!("unknown operator '{key}'"),
                });
            }
            recognized += 1;
        }

        if recognized > 2 {
            return Err(EngineError::MalformedQuery {
                path: field.to_string(),
                reason: format!("expression combines {recognized} operators, at most 2 allowed"),
            });
        }

        let mut leaves = Vec::with_capacity(recognized);
        for (op, arg) in op_doc.iter() {
            if op == "$options" {
                continue;
            }
            leaves.push(Self::compile_operator(field, &segments, op, arg, op_doc)?);
        }

        if leaves.len() == 1 {
            Ok(leaves.pop().unwrap_or(Filter::And(Vec::new())))
        } else {
            Ok(Filter::And(leaves))
        }
    }

    fn compile_operator(
        field: &str,
        segments: &[String],
        op: &str,
        arg: &Bson,
        op_doc: &Document,
    ) -> EngineResult<Filter> {
        let leaf = |predicate| Filter::Leaf {
            path: segments.to_vec(),
            predicate,
        };

        let filter = match op {
            "$gt" => leaf(Predicate::Cmp(CmpOp::Gt, arg.clone())),
            "$gte" => leaf(Predicate::Cmp(CmpOp::Gte, arg.clone())),
            "$lt" => leaf(Predicate::Cmp(CmpOp::Lt, arg.clone())),
            "$lte" => leaf(Predicate::Cmp(CmpOp::Lte, arg.clone())),
            "$ne" => leaf(Predicate::Ne(arg.clone())),
            "$in" => leaf(Predicate::In(operand_array(field, op, arg)?)),
            "$nin" => leaf(Predicate::Nin(operand_array(field, op, arg)?)),
            "$all" => leaf(Predicate::All(operand_array(field, op, arg)?)),
            "$exists" => {
                let Bson::Boolean(should_exist) = arg else {
                    return Err(malformed(field, "$exists expects a boolean"));
                };
                leaf(Predicate::Exists(*should_exist))
            }
            "$mod" => {
                let pair = operand_array(field, op, arg)?;
                let (Some(divisor), Some(remainder)) = (
                    pair.first().and_then(value::as_number),
                    pair.get(1).and_then(value::as_number),
                ) else {
                    return Err(malformed(field, "$mod expects [divisor, remainder]"));
                };
                if pair.len() != 2 || divisor == 0.0 {
                    return Err(malformed(field, "$mod expects a non-zero divisor and a remainder"));
                }
                leaf(Predicate::Mod {
                    divisor: divisor as i64,
                    remainder: remainder as i64,
                })
            }
            "$size" => {
                let Some(len) = value::as_number(arg) else {
                    return Err(malformed(field, "$size expects an integer"));
                };
                if len.fract() != 0.0 {
                    return Err(malformed(field, "$size expects an integer"));
                }
                leaf(Predicate::Size(len as i64))
            }
            "$not" => {
                let inner = match arg {
                    Bson::Document(_) | Bson::RegularExpression(_) => {
                        Self::compile_field(field, arg)?
                    }
                    _ => return Err(malformed(field, "$not expects an operator document or regex")),
                };
                Filter::Not(Box::new(inner))
            }
            "$regex" => {
                let Bson::String(pattern) = arg else {
                    return Err(malformed(field, "$regex expects a pattern string"));
                };
                let options = match op_doc.get("$options") {
                    Some(Bson::String(flags)) => flags.as_str(),
                    _ => "",
                };
                leaf(Predicate::Regex(build_regex(field, pattern, options)?))
            }
            "$elemMatch" => {
                let Bson::Document(sub) = arg else {
                    return Err(malformed(field, "$elemMatch expects a sub-query document"));
                };
                leaf(Predicate::ElemMatch(Box::new(Self::compile(sub)?)))
            }
            "$type" => {
                let Some(code) = value::as_number(arg) else {
                    return Err(malformed(field, "$type expects a numeric type code"));
                };
                leaf(Predicate::Type(code as i32))
            }
            "$near" | "$nearSphere" => leaf(Predicate::Near(NearPredicate::new(
                near_targets(field, arg)?,
                op == "$nearSphere",
            ))),
            _ => return Err(malformed(field, &format!("unknown operator '{op}'"))),
        };

        Ok(filter)
    }
}

impl Predicate {
    fn matches(&self, resolved: &[&Bson]) -> bool {
        match self {
            Predicate::Eq(literal) => {
                if resolved.is_empty() {
                    return matches!(literal, Bson::Null);
                }
                resolved.iter().any(|stored| equals_or_contains(stored, literal))
            }
            Predicate::Cmp(op, operand) => {
                candidates(resolved).any(|stored| {
                    // The query operand drives document comparison, so it sits
                    // on the left; the ordering is flipped accordingly.
                    match value::compare(operand, stored) {
                        Some(ordering) => match op {
                            CmpOp::Gt => ordering == Ordering::Less,
                            CmpOp::Gte => ordering != Ordering::Greater,
                            CmpOp::Lt => ordering == Ordering::Greater,
                            CmpOp::Lte => ordering != Ordering::Less,
                        },
                        None => false,
                    }
                })
            }
            Predicate::Ne(operand) => {
                !candidates(resolved).any(|stored| values_equal(stored, operand))
            }
            Predicate::In(operands) => candidates(resolved)
                .any(|stored| operands.iter().any(|operand| values_equal(stored, operand))),
            Predicate::Nin(operands) => !candidates(resolved)
                .any(|stored| operands.iter().any(|operand| values_equal(stored, operand))),
            Predicate::All(operands) => resolved.iter().any(|stored| match stored {
                Bson::Array(elements) => operands.iter().all(|operand| match operand {
                    Bson::RegularExpression(raw) => {
                        match build_regex("", raw.pattern.as_str(), raw.options.as_str()) {
                            Ok(re) => elements.iter().any(|element| match element {
                                Bson::String(s) => re.is_match(s),
                                _ => false,
                            }),
                            Err(_) => false,
                        }
                    }
                    literal => elements.iter().any(|element| values_equal(element, literal)),
                }),
                _ => false,
            }),
            Predicate::Exists(should_exist) => !resolved.is_empty() == *should_exist,
            Predicate::Mod { divisor, remainder } => candidates(resolved).any(|stored| {
                value::as_number(stored)
                    .map(|n| (n as i64) % divisor == *remainder)
                    .unwrap_or(false)
            }),
            Predicate::Size(len) => resolved.iter().any(|stored| match stored {
                Bson::Array(elements) => elements.len() as i64 == *len,
                _ => false,
            }),
            Predicate::Regex(re) => candidates(resolved).any(|stored| match stored {
                Bson::String(s) => re.is_match(s),
                _ => false,
            }),
            Predicate::ElemMatch(filter) => resolved.iter().any(|stored| match stored {
                Bson::Array(elements) => elements.iter().any(|element| match element {
                    Bson::Document(doc) => filter.matches(doc),
                    _ => false,
                }),
                _ => false,
            }),
            Predicate::Type(code) => candidates(resolved)
                .any(|stored| value::type_code(stored) == Some(*code)),
            Predicate::Near(near) => {
                let located = resolved
                    .iter()
                    .any(|stored| GeoPoint::from_bson(stored).is_some());
                located && near.accept()
            }
        }
    }
}

/// Yields every resolved value and, for array values, each of their elements.
///
/// This is the fan-out most operators use: a query on an array field matches
/// when the array itself or any element satisfies the predicate.
fn candidates<'a>(resolved: &'a [&'a Bson]) -> impl Iterator<Item = &'a Bson> {
    resolved.iter().flat_map(|stored| {
        let elements: &[Bson] = match stored {
            Bson::Array(elements) => elements.as_slice(),
            _ => &[],
        };
        std::iter::once(*stored).chain(elements.iter())
    })
}

fn equals_or_contains(stored: &Bson, literal: &Bson) -> bool {
    if values_equal(stored, literal) {
        return true;
    }
    match stored {
        Bson::Array(elements) => elements.iter().any(|element| values_equal(element, literal)),
        _ => false,
    }
}

fn operand_array(field: &str, op: &str, arg: &Bson) -> EngineResult<Vec<Bson>> {
    match arg {
        Bson::Array(elements) => Ok(elements.clone()),
        other => Err(EngineError::MalformedQuery {
            path: field.to_string(),
            reason: format!("{op} expects an array operand, found {}", value::shape_name(other)),
        }),
    }
}

fn near_targets(field: &str, arg: &Bson) -> EngineResult<Vec<GeoPoint>> {
    if let Some(point) = GeoPoint::from_bson(arg) {
        return Ok(vec![point]);
    }

    if let Bson::Array(elements) = arg {
        let points = elements
            .iter()
            .map(GeoPoint::from_bson)
            .collect::<Option<Vec<_>>>();
        if let Some(points) = points {
            if !points.is_empty() {
                return Ok(points);
            }
        }
    }

    Err(malformed(field, "$near expects coordinates as [lat, lon] or {lat, lon}"))
}

/// Builds a regex from a pattern and MongoDB-style flag string.
///
/// Flags map as `i` case-insensitive, `m` multiline, `s` dot-matches-newline,
/// `x` extended/comments mode.
fn build_regex(field: &str, pattern: &str, options: &str) -> EngineResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|err| EngineError::MalformedQuery {
            path: field.to_string(),
            reason: format!("invalid regex: {err}"),
        })
}

fn malformed(field: &str, reason: &str) -> EngineError {
    EngineError::MalformedQuery {
        path: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{Bson, doc};

    fn compile(query: Document) -> Filter {
        Filter::compile(&query).expect("query should compile")
    }

    fn raw_regex(pattern: &str, options: &str) -> Bson {
        Bson::RegularExpression(bson::Regex {
            pattern: pattern.try_into().expect("valid pattern"),
            options: options.try_into().expect("valid options"),
        })
    }

    #[test]
    fn literal_equality_matches() {
        let filter = compile(doc! { "name": "Alice" });
        assert!(filter.matches(&doc! { "name": "Alice", "age": 30 }));
        assert!(!filter.matches(&doc! { "name": "Bob" }));
        assert!(!filter.matches(&doc! {}));
    }

    #[test]
    fn null_literal_matches_missing_field() {
        let filter = compile(doc! { "name": Bson::Null });
        assert!(filter.matches(&doc! {}));
        assert!(filter.matches(&doc! { "name": Bson::Null }));
        assert!(!filter.matches(&doc! { "name": "set" }));
    }

    #[test]
    fn array_field_matches_contained_literal() {
        let filter = compile(doc! { "tags": "blue" });
        assert!(filter.matches(&doc! { "tags": ["red", "blue"] }));
        assert!(!filter.matches(&doc! { "tags": ["red"] }));
    }

    #[test]
    fn path_fan_out_feeds_comparisons() {
        let doc = doc! { "a": [{ "b": 1 }, { "b": 2 }] };
        assert!(compile(doc! { "a.b": { "$gt": 1 } }).matches(&doc));
        assert!(!compile(doc! { "a.b": { "$gt": 5 } }).matches(&doc));
    }

    #[test]
    fn comparison_fans_into_array_elements() {
        let doc = doc! { "scores": [3, 8, 1] };
        assert!(compile(doc! { "scores": { "$gte": 8 } }).matches(&doc));
        assert!(!compile(doc! { "scores": { "$gt": 8 } }).matches(&doc));
    }

    #[test]
    fn incomparable_values_fail_closed() {
        let filter = compile(doc! { "a": { "$lt": 10 } });
        assert!(!filter.matches(&doc! { "a": "not a number" }));
    }

    #[test]
    fn two_operators_combine_three_reject() {
        let filter = compile(doc! { "a": { "$gt": 1, "$lt": 5 } });
        assert!(filter.matches(&doc! { "a": 3 }));
        assert!(!filter.matches(&doc! { "a": 7 }));

        let err = Filter::compile(&doc! { "a": { "$gt": 1, "$lt": 5, "$in": [1, 2] } })
            .expect_err("three operators must not compile");
        assert!(matches!(err, EngineError::MalformedQuery { path, .. } if path == "a"));
    }

    #[test]
    fn unknown_operator_rejected() {
        assert!(matches!(
            Filter::compile(&doc! { "a": { "$frobnicate": 1 } }),
            Err(EngineError::MalformedQuery { .. })
        ));
    }

    #[test]
    fn operator_free_subdocument_is_literal_target() {
        let filter = compile(doc! { "point": { "x": 1, "y": 2 } });
        assert!(filter.matches(&doc! { "point": { "x": 1, "y": 2 } }));
        assert!(!filter.matches(&doc! { "point": { "x": 1 } }));
    }

    #[test]
    fn ne_matches_missing_field() {
        let filter = compile(doc! { "a": { "$ne": 5 } });
        assert!(filter.matches(&doc! {}));
        assert!(filter.matches(&doc! { "a": 4 }));
        assert!(!filter.matches(&doc! { "a": 5 }));
        assert!(!filter.matches(&doc! { "a": [1, 5] }));
    }

    #[test]
    fn in_and_nin_direction_flip() {
        let members = compile(doc! { "a": { "$in": [1, 2] } });
        assert!(members.matches(&doc! { "a": 2 }));
        assert!(members.matches(&doc! { "a": [7, 2] }));
        assert!(!members.matches(&doc! { "a": 3 }));
        assert!(!members.matches(&doc! {}));

        let excluded = compile(doc! { "a": { "$nin": [1, 2] } });
        assert!(excluded.matches(&doc! { "a": 3 }));
        assert!(excluded.matches(&doc! {}));
        assert!(!excluded.matches(&doc! { "a": [2, 9] }));
    }

    #[test]
    fn all_requires_every_element() {
        let filter = compile(doc! { "tags": { "$all": ["a", "b"] } });
        assert!(filter.matches(&doc! { "tags": ["c", "b", "a"] }));
        assert!(!filter.matches(&doc! { "tags": ["a"] }));
        assert!(!filter.matches(&doc! { "tags": "a" }));
    }

    #[test]
    fn exists_tracks_presence() {
        let present = compile(doc! { "a": { "$exists": true } });
        assert!(present.matches(&doc! { "a": Bson::Null }));
        assert!(!present.matches(&doc! {}));

        let absent = compile(doc! { "a": { "$exists": false } });
        assert!(absent.matches(&doc! {}));
        assert!(!absent.matches(&doc! { "a": 1 }));
    }

    #[test]
    fn mod_and_size_operators() {
        let by_mod = compile(doc! { "n": { "$mod": [4, 1] } });
        assert!(by_mod.matches(&doc! { "n": 9 }));
        assert!(!by_mod.matches(&doc! { "n": 8 }));
        assert!(!by_mod.matches(&doc! {}));

        let by_size = compile(doc! { "tags": { "$size": 2 } });
        assert!(by_size.matches(&doc! { "tags": [1, 2] }));
        assert!(!by_size.matches(&doc! { "tags": [1] }));
        assert!(!by_size.matches(&doc! { "tags": "ab" }));
    }

    #[test]
    fn fractional_size_operand_rejected() {
        let err = Filter::compile(&doc! { "tags": { "$size": 2.5 } })
            .expect_err("fractional length must not compile");
        assert!(matches!(err, EngineError::MalformedQuery { path, .. } if path == "tags"));

        // A whole-valued double is still a valid length.
        assert!(compile(doc! { "tags": { "$size": 2.0 } }).matches(&doc! { "tags": [1, 2] }));
    }

    #[test]
    fn regex_searches_strings_and_array_elements() {
        let filter = compile(doc! { "name": { "$regex": "^al", "$options": "i" } });
        assert!(filter.matches(&doc! { "name": "Alice" }));
        assert!(filter.matches(&doc! { "name": ["Bob", "alfred"] }));
        assert!(!filter.matches(&doc! { "name": "Carol" }));
    }

    #[test]
    fn bare_regex_literal_is_a_pattern_search() {
        let filter = compile(doc! { "name": raw_regex("^al", "i") });
        assert!(filter.matches(&doc! { "name": "Alice" }));
        assert!(!filter.matches(&doc! { "name": "Carol" }));
    }

    #[test]
    fn all_accepts_regex_elements() {
        let filter = compile(doc! { "tags": { "$all": [raw_regex("^a", ""), "b"] } });
        assert!(filter.matches(&doc! { "tags": ["apple", "b"] }));
        assert!(!filter.matches(&doc! { "tags": ["b"] }));
    }

    #[test]
    fn not_inverts_an_operator() {
        let filter = compile(doc! { "a": { "$not": { "$gt": 5 } } });
        assert!(filter.matches(&doc! { "a": 3 }));
        assert!(filter.matches(&doc! {}));
        assert!(!filter.matches(&doc! { "a": 9 }));
    }

    #[test]
    fn elem_match_applies_sub_query_per_element() {
        let filter = compile(doc! { "items": { "$elemMatch": { "qty": { "$gt": 10 } } } });
        assert!(filter.matches(&doc! { "items": [{ "qty": 5 }, { "qty": 15 }] }));
        assert!(!filter.matches(&doc! { "items": [{ "qty": 5 }] }));
        assert!(!filter.matches(&doc! { "items": 15 }));
    }

    #[test]
    fn type_checks_value_and_elements() {
        let strings = compile(doc! { "v": { "$type": 2 } });
        assert!(strings.matches(&doc! { "v": "text" }));
        assert!(strings.matches(&doc! { "v": [1, "text"] }));
        assert!(!strings.matches(&doc! { "v": 3 }));
    }

    #[test]
    fn logical_combinators_recurse() {
        let filter = compile(doc! {
            "$or": [
                { "a": { "$lt": 0 } },
                { "$and": [ { "b": 1 }, { "c": { "$exists": true } } ] },
            ]
        });
        assert!(filter.matches(&doc! { "a": -1 }));
        assert!(filter.matches(&doc! { "b": 1, "c": "x" }));
        assert!(!filter.matches(&doc! { "b": 1 }));
    }

    #[test]
    fn or_branches_resolve_independently() {
        // Each branch is compiled and evaluated on its own, so a branch that
        // never mentions a field can match a document regardless of what the
        // other branch filters on.
        let filter = compile(doc! {
            "$or": [
                { "status": "active" },
                { "score": { "$gt": 90 } },
            ]
        });
        assert!(filter.matches(&doc! { "status": "active", "score": 10 }));
        assert!(filter.matches(&doc! { "status": "closed", "score": 95 }));
    }

    #[test]
    fn near_caps_accepted_candidates() {
        let filter = compile(doc! { "loc": { "$near": [0.0, 0.0] } });
        let candidate = doc! { "loc": [1.0, 1.0] };

        for _ in 0..DEFAULT_NEAR_LIMIT {
            assert!(filter.matches(&candidate));
        }
        assert!(!filter.matches(&candidate));
        assert!(!filter.matches(&doc! { "loc": "nowhere" }));
    }

    #[test]
    fn compilation_is_idempotent() {
        let query = doc! { "a": { "$gte": 2 }, "tags": { "$in": ["x"] } };
        let first = compile(query.clone());
        let second = compile(query);

        let fixtures = [
            doc! { "a": 2, "tags": ["x"] },
            doc! { "a": 1, "tags": ["x"] },
            doc! { "a": 5, "tags": [] },
            doc! {},
        ];

        for fixture in &fixtures {
            assert_eq!(first.matches(fixture), second.matches(fixture));
        }
    }
}
