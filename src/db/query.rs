//! Query evaluation for the in-process backend
//!
//! Implements the subset of MongoDB filter, update, sort and projection
//! semantics the adapter relies on. Anything outside that subset is rejected
//! with `NotSupported` rather than silently mis-evaluated.

use std::cmp::Ordering;

use bson::{Bson, Document};
use regex::RegexBuilder;

use crate::types::{Result, StoreError};

// =============================================================================
// Field access
// =============================================================================

/// Resolve a dotted path (`a.b.0.c`) inside a document
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, Document::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(StoreError::Database(format!(
                    "Cannot create field '{}' in element {{{}: non-document}}",
                    rest, head
                ))),
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

// =============================================================================
// Value comparison
// =============================================================================

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Truthiness as used by `$exists` and projections
fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).map(|n| n != 0.0).unwrap_or(true),
    }
}

/// Compare two values of the same BSON type class
///
/// Numbers compare across integer and double representations. Values of
/// unrelated types have no ordering.
pub fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            Some(as_i64(a)?.cmp(&as_i64(b)?))
        }
        _ if is_number(a) && is_number(b) => as_f64(a)?.partial_cmp(&as_f64(b)?),
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match compare(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

/// Equality as a filter sees it: arrays match when any element matches and a
/// missing field matches `null`
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
    }
}

fn ordered(value: Option<&Bson>, bound: &Bson, accept: fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare(item, bound).map(accept).unwrap_or(false)),
        Some(actual) => compare(actual, bound).map(accept).unwrap_or(false),
    }
}

// =============================================================================
// Filters
// =============================================================================

fn is_operator_doc(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

/// Evaluate a filter document against a document
pub fn matches(doc: &Document, filter: &Document) -> Result<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                if key == "$or" {
                    any
                } else {
                    !any
                }
            }
            op if op.starts_with('$') => {
                return Err(StoreError::NotSupported(format!("query operator {}", op)))
            }
            field => field_matches(get_path(doc, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, condition: &'a Bson) -> Result<Vec<&'a Document>> {
    match condition {
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::Document(sub) => Ok(sub),
                _ => Err(StoreError::Validation(format!(
                    "{} entries must be documents",
                    op
                ))),
            })
            .collect(),
        _ => Err(StoreError::Validation(format!("{} expects an array", op))),
    }
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
    match condition {
        Bson::Document(ops) if is_operator_doc(ops) => {
            for (op, operand) in ops {
                if !operator_matches(value, op, operand, ops)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Bson::RegularExpression(re) => regex_matches(value, &re.pattern, &re.options),
        _ => Ok(equals(value, condition)),
    }
}

fn operator_matches(value: Option<&Bson>, op: &str, operand: &Bson, ops: &Document) -> Result<bool> {
    Ok(match op {
        "$eq" => equals(value, operand),
        "$ne" => !equals(value, operand),
        "$gt" => ordered(value, operand, |o| o == Ordering::Greater),
        "$gte" => ordered(value, operand, |o| o != Ordering::Less),
        "$lt" => ordered(value, operand, |o| o == Ordering::Less),
        "$lte" => ordered(value, operand, |o| o != Ordering::Greater),
        "$in" => in_list(value, operand)?,
        "$nin" => !in_list(value, operand)?,
        "$exists" => value.is_some() == truthy(operand),
        "$regex" => {
            let options = ops.get_str("$options").unwrap_or("");
            match operand {
                Bson::String(pattern) => regex_matches(value, pattern, options)?,
                Bson::RegularExpression(re) => regex_matches(value, &re.pattern, &re.options)?,
                _ => return Err(StoreError::Validation("$regex has to be a string".into())),
            }
        }
        "$options" => true,
        other => return Err(StoreError::NotSupported(format!("query operator {}", other))),
    })
}

fn in_list(value: Option<&Bson>, operand: &Bson) -> Result<bool> {
    let Bson::Array(candidates) = operand else {
        return Err(StoreError::Validation("$in needs an array".into()));
    };
    for candidate in candidates {
        let hit = match candidate {
            Bson::RegularExpression(re) => regex_matches(value, &re.pattern, &re.options)?,
            other => equals(value, other),
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn regex_matches(value: Option<&Bson>, pattern: &str, options: &str) -> Result<bool> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .build()
        .map_err(|e| StoreError::Validation(format!("invalid $regex: {}", e)))?;

    Ok(match value {
        Some(Bson::String(s)) => re.is_match(s),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(s) if re.is_match(s))),
        _ => false,
    })
}

// =============================================================================
// Updates
// =============================================================================

/// True when every top-level key is an update operator
pub fn is_update_document(update: &Document) -> bool {
    is_operator_doc(update)
}

/// Apply `$set`, `$unset`, `$inc` and `$setOnInsert` to a document
pub fn apply_update(doc: &mut Document, update: &Document, inserting: bool) -> Result<()> {
    if !is_update_document(update) {
        return Err(StoreError::Validation(
            "update document requires atomic operators".into(),
        ));
    }

    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(StoreError::Validation(format!("{} expects a document", op)));
        };

        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (path, value) in fields {
                        set_path(doc, path, value.clone())?;
                    }
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    unset_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    if !is_number(delta) {
                        return Err(StoreError::Database(
                            "Cannot increment with non-numeric argument".into(),
                        ));
                    }
                    let next = match get_path(doc, path) {
                        None => delta.clone(),
                        Some(current) => add_numbers(path, current, delta)?,
                    };
                    set_path(doc, path, next)?;
                }
            }
            other => {
                return Err(StoreError::NotSupported(format!("update operator {}", other)))
            }
        }
    }
    Ok(())
}

fn add_numbers(path: &str, a: &Bson, b: &Bson) -> Result<Bson> {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => Ok(match x.checked_add(*y) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*x) + i64::from(*y)),
        }),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => as_i64(a)
            .zip(as_i64(b))
            .and_then(|(x, y)| x.checked_add(y))
            .map(Bson::Int64)
            .ok_or_else(|| {
                StoreError::Database(format!(
                    "Failed to apply $inc to field '{}': integer overflow",
                    path
                ))
            }),
        _ => match as_f64(a).zip(as_f64(b)) {
            Some((x, y)) => Ok(Bson::Double(x + y)),
            None => Err(StoreError::Database(format!(
                "Cannot apply $inc to a value of non-numeric type (field '{}')",
                path
            ))),
        },
    }
}

/// Document an upsert starts from: the filter's equality fields
pub fn upsert_seed(filter: &Document) -> Document {
    let mut seed = Document::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        let value = match condition {
            Bson::Document(ops) if is_operator_doc(ops) => ops.get("$eq").cloned(),
            Bson::RegularExpression(_) => None,
            other => Some(other.clone()),
        };
        if let Some(value) = value {
            // A conflicting dotted path just leaves the field out of the seed
            let _ = set_path(&mut seed, key, value);
        }
    }
    seed
}

// =============================================================================
// Sort and projection
// =============================================================================

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        Some(Bson::MinKey) => 0,
        None | Some(Bson::Null) | Some(Bson::Undefined) => 1,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => 2,
        Some(Bson::String(_) | Bson::Symbol(_)) => 3,
        Some(Bson::Document(_)) => 4,
        Some(Bson::Array(_)) => 5,
        Some(Bson::Binary(_)) => 6,
        Some(Bson::ObjectId(_)) => 7,
        Some(Bson::Boolean(_)) => 8,
        Some(Bson::DateTime(_)) => 9,
        Some(Bson::Timestamp(_)) => 10,
        Some(Bson::RegularExpression(_)) => 11,
        Some(Bson::MaxKey) => 13,
        Some(_) => 12,
    }
}

fn compare_by(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let descending = as_f64(direction).map(|d| d < 0.0).unwrap_or(false);
        let (x, y) = (get_path(a, field), get_path(b, field));
        let ordering = type_rank(x).cmp(&type_rank(y)).then_with(|| match (x, y) {
            (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        });
        let ordering = if descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable sort; ties keep insertion order
pub fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| compare_by(a, b, sort));
}

/// Apply a top-level inclusion or exclusion projection
pub fn project(doc: Document, projection: &Document) -> Document {
    if projection.is_empty() {
        return doc;
    }

    let include_id = projection.get("_id").map(truthy).unwrap_or(true);
    let inclusive = projection
        .iter()
        .any(|(k, v)| k != "_id" && truthy(v));

    if inclusive {
        doc.into_iter()
            .filter(|(k, _)| {
                if k == "_id" {
                    include_id
                } else {
                    projection.get(k).map(truthy).unwrap_or(false)
                }
            })
            .collect()
    } else {
        let mut doc = doc;
        for (k, v) in projection {
            if !truthy(v) {
                doc.remove(k);
            }
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId, Regex};

    #[test]
    fn test_equality_and_missing_fields() {
        let d = doc! { "item": "pen", "qty": 5, "tags": ["a", "b"] };
        assert!(matches(&d, &doc! { "item": "pen" }).unwrap());
        assert!(matches(&d, &doc! { "qty": 5i64 }).unwrap());
        assert!(matches(&d, &doc! { "tags": "b" }).unwrap());
        assert!(matches(&d, &doc! { "missing": null }).unwrap());
        assert!(!matches(&d, &doc! { "item": "ink" }).unwrap());
        assert!(matches(&d, &doc! {}).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let d = doc! { "n": 10, "s": "m" };
        assert!(matches(&d, &doc! { "n": { "$gt": 5, "$lte": 10 } }).unwrap());
        assert!(!matches(&d, &doc! { "n": { "$lt": 10 } }).unwrap());
        assert!(matches(&d, &doc! { "n": { "$gte": 9.5 } }).unwrap());
        assert!(matches(&d, &doc! { "s": { "$in": ["a", "m"] } }).unwrap());
        assert!(matches(&d, &doc! { "s": { "$nin": ["a"] } }).unwrap());
        assert!(matches(&d, &doc! { "n": { "$ne": 3 } }).unwrap());
        assert!(matches(&d, &doc! { "x": { "$exists": false } }).unwrap());
        assert!(!matches(&d, &doc! { "n": { "$gt": "a" } }).unwrap());
    }

    #[test]
    fn test_logical_operators_and_paths() {
        let d = doc! { "a": { "b": 1 }, "list": [{ "c": 2 }] };
        assert!(matches(&d, &doc! { "a.b": 1 }).unwrap());
        assert!(matches(&d, &doc! { "list.0.c": 2 }).unwrap());
        assert!(matches(&d, &doc! { "$or": [{ "a.b": 2 }, { "a.b": 1 }] }).unwrap());
        assert!(!matches(&d, &doc! { "$and": [{ "a.b": 1 }, { "list.0.c": 3 }] }).unwrap());
        assert!(matches(&d, &doc! { "$nor": [{ "a.b": 9 }] }).unwrap());
    }

    #[test]
    fn test_regex_prefix() {
        let d = doc! { "key": "user:42" };
        assert!(matches(&d, &doc! { "key": { "$regex": "^user:" } }).unwrap());
        assert!(matches(&d, &doc! { "key": { "$regex": "^USER", "$options": "i" } }).unwrap());
        let re = Regex {
            pattern: "^order".to_string(),
            options: String::new(),
        };
        assert!(!matches(&d, &doc! { "key": re }).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let d = doc! { "n": 1 };
        let err = matches(&d, &doc! { "n": { "$where": "1" } }).unwrap_err();
        assert!(matches!(err, StoreError::NotSupported(_)));
    }

    #[test]
    fn test_apply_set_and_inc() {
        let mut d = doc! { "val": 1 };
        apply_update(&mut d, &doc! { "$inc": { "val": 2i64 }, "$set": { "x.y": true } }, false).unwrap();
        assert_eq!(d.get("val"), Some(&Bson::Int64(3)));
        assert_eq!(get_path(&d, "x.y"), Some(&Bson::Boolean(true)));

        let mut fresh = Document::new();
        apply_update(&mut fresh, &doc! { "$inc": { "val": -4i64 } }, true).unwrap();
        assert_eq!(fresh.get("val"), Some(&Bson::Int64(-4)));
    }

    #[test]
    fn test_inc_non_numeric_fails() {
        let mut d = doc! { "val": "text" };
        let err = apply_update(&mut d, &doc! { "$inc": { "val": 1 } }, false).unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn test_inc_overflow_is_not_a_type_error() {
        let mut d = doc! { "val": i64::MAX };
        let err = apply_update(&mut d, &doc! { "$inc": { "val": 1i64 } }, false).unwrap_err();
        assert!(err.to_string().contains("integer overflow"));
        assert!(!err.to_string().contains("non-numeric"));
        assert_eq!(d.get("val"), Some(&Bson::Int64(i64::MAX)));
    }

    #[test]
    fn test_update_requires_operators() {
        let mut d = doc! {};
        assert!(apply_update(&mut d, &doc! { "plain": 1 }, false).is_err());
    }

    #[test]
    fn test_upsert_seed_keeps_equality_fields() {
        let seed = upsert_seed(&doc! { "key": "a", "keyspace": "ks", "n": { "$gt": 1 } });
        assert_eq!(seed, doc! { "key": "a", "keyspace": "ks" });
    }

    #[test]
    fn test_sort_and_projection() {
        let mut docs = vec![
            doc! { "_id": ObjectId::new(), "n": 2, "name": "b" },
            doc! { "_id": ObjectId::new(), "n": 1, "name": "a" },
            doc! { "_id": ObjectId::new(), "name": "c" },
        ];
        sort_documents(&mut docs, &doc! { "n": -1 });
        let names: Vec<&str> = docs.iter().map(|d| d.get_str("name").unwrap()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        let projected = project(docs[0].clone(), &doc! { "name": 1, "_id": 0 });
        assert_eq!(projected, doc! { "name": "b" });

        let excluded = project(doc! { "a": 1, "b": 2 }, &doc! { "b": 0 });
        assert_eq!(excluded, doc! { "a": 1 });
    }
}
