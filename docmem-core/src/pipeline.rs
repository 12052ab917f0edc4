//! Aggregation pipeline stages.
//!
//! A pipeline is a sequence of stage documents applied left-to-right; each
//! stage consumes the full document list and materializes a fresh one before
//! the next stage runs. Stages re-enter the filter and path machinery rather
//! than duplicating it: `$match` compiles a [`Filter`], `$sort` and the
//! accumulators lean on the comparison rules in [`value`].

use bson::{Bson, Document};

use crate::{
    error::{EngineError, EngineResult},
    filter::Filter,
    path,
    value::{self, values_equal},
};

/// Runs a pipeline over an initial document list.
///
/// Stage order is exactly the order supplied; each stage document must carry
/// a single recognized stage key (`$match`, `$project`, `$group`, `$sort`,
/// `$skip`, `$limit`, `$unwind`).
///
/// # Errors
///
/// Returns [`EngineError::MalformedQuery`] for unknown or malformed stages and
/// [`EngineError::UnwindTargetNotArray`] when `$unwind` lands on a scalar.
pub fn run(mut docs: Vec<Document>, stages: &[Document]) -> EngineResult<Vec<Document>> {
    for stage in stages {
        docs = apply_stage(docs, stage)?;
    }
    Ok(docs)
}

fn apply_stage(docs: Vec<Document>, stage: &Document) -> EngineResult<Vec<Document>> {
    let mut entries = stage.iter();
    let (Some((name, arg)), None) = (entries.next(), entries.next()) else {
        return Err(malformed("$pipeline", "a stage must have exactly one key"));
    };

    match name.as_str() {
        "$match" => stage_match(docs, arg),
        "$project" => stage_project(docs, arg),
        "$group" => stage_group(docs, arg),
        "$sort" => stage_sort(docs, arg),
        "$skip" => stage_skip(docs, arg),
        "$limit" => stage_limit(docs, arg),
        "$unwind" => stage_unwind(docs, arg),
        other => Err(malformed(other, "unknown pipeline stage")),
    }
}

fn stage_match(docs: Vec<Document>, arg: &Bson) -> EngineResult<Vec<Document>> {
    let Bson::Document(query) = arg else {
        return Err(malformed("$match", "expects a query document"));
    };

    let filter = Filter::compile(query)?;
    Ok(docs.into_iter().filter(|doc| filter.matches(doc)).collect())
}

fn stage_project(docs: Vec<Document>, arg: &Bson) -> EngineResult<Vec<Document>> {
    let Bson::Document(spec) = arg else {
        return Err(malformed("$project", "expects a projection document"));
    };

    let id_excluded = match spec.get("_id") {
        Some(Bson::Boolean(flag)) => !*flag,
        Some(other) => value::as_number(other) == Some(0.0),
        None => false,
    };

    docs.into_iter()
        .map(|doc| {
            let mut projected = Document::new();
            if !id_excluded {
                if let Some(id) = doc.get("_id") {
                    projected.insert("_id", id.clone());
                }
            }
            project_into(&mut projected, spec, &doc, "")?;
            Ok(projected)
        })
        .collect()
}

/// Fills `out` from a projection spec. `$`-prefixed string values are renames
/// resolved against the source document's root; plain inclusions inside a
/// nested spec resolve relative to the enclosing path, so `{a: {b: 1}}`
/// carries over `a.b` rather than a root-level `b`.
fn project_into(
    out: &mut Document,
    spec: &Document,
    doc: &Document,
    prefix: &str,
) -> EngineResult<()> {
    for (key, rule) in spec.iter() {
        if prefix.is_empty() && key == "_id" {
            continue; // Handled by the inclusion default above.
        }
        let target = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match rule {
            Bson::String(source) if source.starts_with('$') => {
                if let Some(resolved) = first_value(&source[1..], doc) {
                    insert_at_path(out, &target, resolved);
                }
            }
            Bson::Document(nested) => {
                project_into(out, nested, doc, &target)?;
            }
            included if is_truthy(included) => {
                if let Some(resolved) = first_value(&target, doc) {
                    insert_at_path(out, &target, resolved);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn stage_group(docs: Vec<Document>, arg: &Bson) -> EngineResult<Vec<Document>> {
    let Bson::Document(spec) = arg else {
        return Err(malformed("$group", "expects a group document"));
    };
    let Some(id_expr) = spec.get("_id") else {
        return Err(malformed("$group", "missing the _id grouping expression"));
    };

    // Partition in first-seen order; keys compare structurally.
    let mut groups: Vec<(Bson, Vec<Document>)> = Vec::new();
    for doc in docs {
        let key = eval_expr(id_expr, &doc);
        match groups.iter_mut().find(|(existing, _)| values_equal(existing, &key)) {
            Some((_, members)) => members.push(doc),
            None => groups.push((key, vec![doc])),
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut out = Document::new();
            out.insert("_id", key);
            for (field, rule) in spec.iter() {
                if field == "_id" {
                    continue;
                }
                out.insert(field.clone(), accumulate(field, rule, &members)?);
            }
            Ok(out)
        })
        .collect()
}

fn accumulate(field: &str, rule: &Bson, members: &[Document]) -> EngineResult<Bson> {
    let Bson::Document(acc) = rule else {
        return Err(malformed(field, "group output fields expect an accumulator document"));
    };
    let mut entries = acc.iter();
    let (Some((op, expr)), None) = (entries.next(), entries.next()) else {
        return Err(malformed(field, "an accumulator takes exactly one operator"));
    };

    let result = match op.as_str() {
        "$first" => members
            .first()
            .map(|doc| eval_expr(expr, doc))
            .unwrap_or(Bson::Null),
        "$last" => members
            .last()
            .map(|doc| eval_expr(expr, doc))
            .unwrap_or(Bson::Null),
        "$min" => operand_values(expr, members)
            .into_iter()
            .min_by(|a, b| value::total_cmp(a, b))
            .unwrap_or(Bson::Null),
        "$max" => operand_values(expr, members)
            .into_iter()
            .max_by(|a, b| value::total_cmp(a, b))
            .unwrap_or(Bson::Null),
        "$avg" => {
            let numbers: Vec<f64> = operand_values(expr, members)
                .iter()
                .filter_map(value::as_number)
                .collect();
            if numbers.is_empty() {
                Bson::Null
            } else {
                Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        "$sum" => sum_values(expr, members),
        other => return Err(malformed(field, &format!("unknown accumulator '{other}'"))),
    };

    Ok(result)
}

/// `$sum` keeps the source values' numeric subtype when they agree; a bare
/// numeric operand multiplies by the group's member count.
fn sum_values(expr: &Bson, members: &[Document]) -> Bson {
    if !matches!(expr, Bson::String(s) if s.starts_with('$')) {
        let count = members.len() as i64;
        return match expr {
            Bson::Int32(n) => Bson::Int32(n.wrapping_mul(count as i32)),
            Bson::Int64(n) => Bson::Int64(n.wrapping_mul(count)),
            Bson::Double(n) => Bson::Double(n * count as f64),
            _ => Bson::Int32(0),
        };
    }

    let mut total: Option<Bson> = None;
    for candidate in operand_values(expr, members) {
        if value::as_number(&candidate).is_none() {
            continue;
        }
        total = Some(match total {
            None => candidate,
            Some(acc) => value::numeric_add(&acc, &candidate).unwrap_or(acc),
        });
    }
    total.unwrap_or(Bson::Int32(0))
}

fn stage_sort(mut docs: Vec<Document>, arg: &Bson) -> EngineResult<Vec<Document>> {
    let Bson::Document(spec) = arg else {
        return Err(malformed("$sort", "expects a document of field directions"));
    };

    let mut keys = Vec::with_capacity(spec.len());
    for (field, direction) in spec.iter() {
        let descending = match value::as_number(direction) {
            Some(n) if n == 1.0 => false,
            Some(n) if n == -1.0 => true,
            _ => return Err(malformed(field, "sort direction must be 1 or -1")),
        };
        keys.push((path::split(field), descending));
    }

    docs.sort_by(|a, b| {
        for (segments, descending) in &keys {
            let left = path::resolve(segments, a);
            let right = path::resolve(segments, b);
            let ordering = value::total_cmp(
                left.first().copied().unwrap_or(&Bson::Null),
                right.first().copied().unwrap_or(&Bson::Null),
            );
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if !ordering.is_eq() {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });

    Ok(docs)
}

fn stage_skip(docs: Vec<Document>, arg: &Bson) -> EngineResult<Vec<Document>> {
    let count = stage_count("$skip", arg)?;
    Ok(docs.into_iter().skip(count).collect())
}

fn stage_limit(docs: Vec<Document>, arg: &Bson) -> EngineResult<Vec<Document>> {
    let count = stage_count("$limit", arg)?;
    Ok(docs.into_iter().take(count).collect())
}

fn stage_count(stage: &str, arg: &Bson) -> EngineResult<usize> {
    match value::as_number(arg) {
        Some(n) if n >= 0.0 => Ok(n as usize),
        _ => Err(malformed(stage, "expects a non-negative integer")),
    }
}

fn stage_unwind(docs: Vec<Document>, arg: &Bson) -> EngineResult<Vec<Document>> {
    let Bson::String(target) = arg else {
        return Err(malformed("$unwind", "expects a '$field' path string"));
    };
    let Some(field) = target.strip_prefix('$') else {
        return Err(malformed("$unwind", "expects a '$field' path string"));
    };

    let segments = path::split(field);
    let mut unwound = Vec::new();

    for doc in docs {
        let resolved = path::resolve(&segments, &doc);
        let Some(first) = resolved.first() else {
            continue; // Missing target drops the document.
        };

        match first {
            Bson::Array(elements) => {
                for element in elements.clone() {
                    let mut copy = doc.clone();
                    insert_at_path(&mut copy, field, element);
                    unwound.push(copy);
                }
            }
            _ => return Err(EngineError::UnwindTargetNotArray(field.to_string())),
        }
    }

    Ok(unwound)
}

/// Evaluates a group/projection expression against a document: `"$path"`
/// resolves a field (missing resolves to `Null`), a document maps each entry
/// recursively, anything else is a constant.
fn eval_expr(expr: &Bson, doc: &Document) -> Bson {
    match expr {
        Bson::String(s) if s.starts_with('$') => {
            first_value(&s[1..], doc).unwrap_or(Bson::Null)
        }
        Bson::Document(sub) => {
            let mut mapped = Document::new();
            for (key, inner) in sub.iter() {
                mapped.insert(key.clone(), eval_expr(inner, doc));
            }
            Bson::Document(mapped)
        }
        constant => constant.clone(),
    }
}

/// Per-member operand values for an accumulator; members where a field
/// reference does not resolve contribute nothing.
fn operand_values(expr: &Bson, members: &[Document]) -> Vec<Bson> {
    match expr {
        Bson::String(s) if s.starts_with('$') => members
            .iter()
            .filter_map(|doc| first_value(&s[1..], doc))
            .collect(),
        constant => members.iter().map(|_| constant.clone()).collect(),
    }
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        other => value::as_number(other).is_some_and(|n| n != 0.0),
    }
}

fn first_value(field: &str, doc: &Document) -> Option<Bson> {
    path::resolve_str(field, doc).first().map(|value| (*value).clone())
}

/// Inserts a value at a dot path, creating intermediate documents. A
/// non-document intermediate silently wins over the projection target.
fn insert_at_path(doc: &mut Document, field: &str, value: Bson) {
    let segments = path::split(field);
    let Some((last, intermediate)) = segments.split_last() else {
        return;
    };

    let mut current = doc;
    for segment in intermediate {
        if !matches!(current.get(segment), Some(Bson::Document(_))) {
            if current.contains_key(segment) {
                return;
            }
            current.insert(segment.clone(), Document::new());
        }
        current = match current.get_mut(segment) {
            Some(Bson::Document(next)) => next,
            _ => return,
        };
    }

    current.insert(last.clone(), value);
}

fn malformed(path: &str, reason: &str) -> EngineError {
    EngineError::MalformedQuery {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
