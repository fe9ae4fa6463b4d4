//! Query filter evaluation for in-memory document matching.
//!
//! Filters use the store's native query syntax: implicit equality, dotted
//! paths into embedded documents and arrays, comparison operators, and the
//! `$and`/`$or`/`$nor` combinators. `$jsonSchema` is accepted at the top level
//! so collection validators can be evaluated by the same code.

use std::cmp::Ordering;

use bson::{Bson, Document};

use docstore_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::schema;

/// Position of a value's type in the store's cross-type sort order.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

/// Numeric view of a value. Decimals are not compared numerically.
pub(crate) fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

/// Total order over values: by type rank first, then by value.
pub(crate) fn compare(left: &Bson, right: &Bson) -> Ordering {
    type_rank(left)
        .cmp(&type_rank(right))
        .then_with(|| compare_within_type(left, right))
}

fn compare_within_type(left: &Bson, right: &Bson) -> Ordering {
    match (left, right) {
        (Bson::String(a) | Bson::Symbol(a), Bson::String(b) | Bson::Symbol(b)) => a.cmp(b),
        (Bson::Boolean(a), Bson::Boolean(b)) => a.cmp(b),
        (Bson::ObjectId(a), Bson::ObjectId(b)) => a.bytes().cmp(&b.bytes()),
        (Bson::DateTime(a), Bson::DateTime(b)) => a.timestamp_millis().cmp(&b.timestamp_millis()),
        (Bson::Timestamp(a), Bson::Timestamp(b)) => (a.time, a.increment).cmp(&(b.time, b.increment)),
        (Bson::Array(a), Bson::Array(b)) => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| compare(x, y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Bson::Document(a), Bson::Document(b)) => a
            .iter()
            .zip(b.iter())
            .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare(va, vb)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

/// Equality as the store defines it: numbers compare by value across widths,
/// embedded documents compare field by field in order.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (left, right) {
        (Bson::Document(a), Bson::Document(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        },
        (Bson::Array(a), Bson::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        },
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ if type_rank(left) == 1 && type_rank(right) == 1 => true,
            _ => left == right,
        },
    }
}

/// Resolves a dotted path, fanning out through arrays. An empty result means
/// the path is missing.
pub(crate) fn resolve<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut current = vec![];
    let mut segments = path.split('.');

    let Some(first) = segments.next() else {
        return current;
    };
    if let Some(value) = document.get(first) {
        current.push(value);
    }

    for segment in segments {
        let mut next = vec![];

        for value in current {
            match value {
                Bson::Document(inner) => next.extend(inner.get(segment)),
                Bson::Array(items) => match segment.parse::<usize>() {
                    Ok(index) => next.extend(items.get(index)),
                    Err(_) => next.extend(
                        items
                            .iter()
                            .filter_map(|item| item.as_document())
                            .filter_map(|inner| inner.get(segment)),
                    ),
                },
                _ => {},
            }
        }

        current = next;
    }

    current
}

/// First value at `path`, or `Null` when missing.
pub(crate) fn first_value(document: &Document, path: &str) -> Bson {
    resolve(document, path)
        .first()
        .map(|value| (*value).clone())
        .unwrap_or(Bson::Null)
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Checks the document against a filter.
    pub fn matches(&self, filter: &Document) -> DocumentStoreResult<bool> {
        for (key, condition) in filter {
            let satisfied = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for clause in clauses(key, condition)? {
                        if !self.matches(clause)? {
                            all = false;
                            break;
                        }
                    }
                    all
                },
                "$or" => {
                    let mut any = false;
                    for clause in clauses(key, condition)? {
                        if self.matches(clause)? {
                            any = true;
                            break;
                        }
                    }
                    any
                },
                "$nor" => {
                    let mut none = true;
                    for clause in clauses(key, condition)? {
                        if self.matches(clause)? {
                            none = false;
                            break;
                        }
                    }
                    none
                },
                "$jsonSchema" => match condition {
                    Bson::Document(json_schema) => schema::conforms_document(self.document, json_schema),
                    _ => return Err(DocumentStoreError::Backend("$jsonSchema must be an object".into())),
                },
                operator if operator.starts_with('$') => {
                    return Err(DocumentStoreError::Backend(format!("unknown top level operator: {operator}")));
                },
                path => self.field_matches(path, condition)?,
            };

            if !satisfied {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn field_matches(&self, path: &str, condition: &Bson) -> DocumentStoreResult<bool> {
        let candidates = resolve(self.document, path);

        match condition {
            Bson::Document(operators) if is_operator_document(operators) => operators_match(&candidates, operators),
            _ => Ok(equals_any(&candidates, condition)),
        }
    }
}

fn clauses<'b>(operator: &str, condition: &'b Bson) -> DocumentStoreResult<Vec<&'b Document>> {
    let invalid = || DocumentStoreError::Backend(format!("{operator} must be a nonempty array of objects"));

    let items = condition.as_array().ok_or_else(invalid)?;
    if items.is_empty() {
        return Err(invalid());
    }

    items
        .iter()
        .map(|item| item.as_document().ok_or_else(invalid))
        .collect()
}

fn is_operator_document(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

/// Candidates plus the elements of any array candidate.
fn expanded<'a>(candidates: &[&'a Bson]) -> Vec<&'a Bson> {
    candidates
        .iter()
        .flat_map(|&candidate| {
            let mut values = vec![candidate];
            if let Bson::Array(items) = candidate {
                values.extend(items.iter());
            }
            values
        })
        .collect()
}

fn equals_any(candidates: &[&Bson], value: &Bson) -> bool {
    if matches!(value, Bson::Null) && candidates.is_empty() {
        return true;
    }

    expanded(candidates)
        .into_iter()
        .any(|candidate| values_equal(candidate, value))
}

fn compares(candidates: &[&Bson], value: &Bson, accept: fn(Ordering) -> bool) -> bool {
    expanded(candidates)
        .into_iter()
        .filter(|candidate| type_rank(candidate) == type_rank(value))
        .any(|candidate| accept(compare(candidate, value)))
}

fn operators_match(candidates: &[&Bson], operators: &Document) -> DocumentStoreResult<bool> {
    for (operator, operand) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => equals_any(candidates, operand),
            "$ne" => !equals_any(candidates, operand),
            "$gt" => compares(candidates, operand, Ordering::is_gt),
            "$gte" => compares(candidates, operand, Ordering::is_ge),
            "$lt" => compares(candidates, operand, Ordering::is_lt),
            "$lte" => compares(candidates, operand, Ordering::is_le),
            "$in" => in_list(candidates, operator, operand)?,
            "$nin" => !in_list(candidates, operator, operand)?,
            "$exists" => {
                let should_exist = match operand {
                    Bson::Boolean(flag) => *flag,
                    other => as_number(other).is_some_and(|n| n != 0.0),
                };
                candidates.is_empty() != should_exist
            },
            "$size" => {
                let expected = as_number(operand)
                    .ok_or_else(|| DocumentStoreError::Backend("$size needs a number".into()))?;
                candidates
                    .iter()
                    .any(|candidate| matches!(candidate, Bson::Array(items) if items.len() as f64 == expected))
            },
            "$not" => match operand {
                Bson::Document(inner) if is_operator_document(inner) => !operators_match(candidates, inner)?,
                _ => return Err(DocumentStoreError::Backend("$not needs an operator document".into())),
            },
            other => return Err(DocumentStoreError::Backend(format!("unknown operator: {other}"))),
        };

        if !satisfied {
            return Ok(false);
        }
    }

    Ok(true)
}

fn in_list(candidates: &[&Bson], operator: &str, operand: &Bson) -> DocumentStoreResult<bool> {
    let values = operand
        .as_array()
        .ok_or_else(|| DocumentStoreError::Backend(format!("{operator} needs an array")))?;

    Ok(values.iter().any(|value| equals_any(candidates, value)))
}
