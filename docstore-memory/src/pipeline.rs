//! Aggregation pipeline execution.
//!
//! Supported stages: `$match`, `$sort`, `$skip`, `$limit`, `$project`,
//! `$group`, `$count`, `$unwind`, and `$addFields` (alias `$set`). Expressions
//! are field paths (`"$field.sub"`), literals, `{ "$literal": v }`, and
//! documents or arrays of expressions.

use std::cmp::Ordering;

use bson::{Bson, Document};

use docstore_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::{
    evaluator::{DocumentEvaluator, as_number, compare, first_value, resolve, values_equal},
    update::add,
};

fn stage_error(message: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::Backend(message.into())
}

/// Runs `pipeline` over `documents`, in stage order.
pub(crate) fn execute(documents: Vec<Document>, pipeline: &[Document]) -> DocumentStoreResult<Vec<Document>> {
    pipeline
        .iter()
        .try_fold(documents, |documents, stage| run_stage(documents, stage))
}

fn run_stage(documents: Vec<Document>, stage: &Document) -> DocumentStoreResult<Vec<Document>> {
    let mut entries = stage.iter();
    let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
        return Err(stage_error("A pipeline stage specification object must contain exactly one field."));
    };

    match name.as_str() {
        "$match" => {
            let filter = spec
                .as_document()
                .ok_or_else(|| stage_error("the match filter must be an expression in an object"))?;

            let mut matched = Vec::with_capacity(documents.len());
            for document in documents {
                if DocumentEvaluator::new(&document).matches(filter)? {
                    matched.push(document);
                }
            }

            Ok(matched)
        },
        "$sort" => {
            let keys = spec
                .as_document()
                .ok_or_else(|| stage_error("the $sort key specification must be an object"))?;
            let mut documents = documents;
            sort_documents(&mut documents, keys)?;

            Ok(documents)
        },
        "$skip" => Ok(documents
            .into_iter()
            .skip(non_negative(name, spec)?)
            .collect()),
        "$limit" => match non_negative(name, spec)? {
            0 => Err(stage_error("the limit must be positive")),
            limit => Ok(documents.into_iter().take(limit).collect()),
        },
        "$project" => {
            let spec = spec
                .as_document()
                .ok_or_else(|| stage_error("$project specification must be an object"))?;
            documents
                .iter()
                .map(|document| project(document, spec))
                .collect()
        },
        "$addFields" | "$set" => {
            let spec = spec
                .as_document()
                .ok_or_else(|| stage_error(format!("{name} specification stage must be an object")))?;
            documents
                .into_iter()
                .map(|mut document| -> DocumentStoreResult<Document> {
                    for (field, expression) in spec {
                        let value = evaluate(&document, expression)?.unwrap_or(Bson::Null);
                        document.insert(field.clone(), value);
                    }
                    Ok(document)
                })
                .collect()
        },
        "$group" => group(&documents, spec),
        "$count" => {
            let field = spec
                .as_str()
                .filter(|field| !field.is_empty() && !field.starts_with('$') && !field.contains('.'))
                .ok_or_else(|| stage_error("the count field must be a non-empty string without '$' or '.'"))?;

            Ok(match documents.len() {
                0 => vec![],
                count => vec![Document::from_iter([(field.to_string(), integer(count as i64))])],
            })
        },
        "$unwind" => unwind(documents, spec),
        other => Err(stage_error(format!("Unrecognized pipeline stage name: '{other}'"))),
    }
}

/// Sorts in place by an ordered key document (`1` ascending, `-1` descending).
/// Missing fields sort as null. The sort is stable.
pub(crate) fn sort_documents(documents: &mut [Document], keys: &Document) -> DocumentStoreResult<()> {
    let keys = keys
        .iter()
        .map(|(field, direction)| match as_number(direction) {
            Some(value) if value == 1.0 => Ok((field.as_str(), false)),
            Some(value) if value == -1.0 => Ok((field.as_str(), true)),
            _ => Err(stage_error(format!("$sort key ordering must be 1 (for ascending) or -1 (for descending), found {field}"))),
        })
        .collect::<DocumentStoreResult<Vec<_>>>()?;

    if keys.is_empty() {
        return Err(stage_error("$sort stage must have at least one sort key"));
    }

    documents.sort_by(|left, right| {
        keys.iter()
            .map(|(field, descending)| {
                let ordering = compare(&first_value(left, field), &first_value(right, field));
                if *descending { ordering.reverse() } else { ordering }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });

    Ok(())
}

fn non_negative(stage: &str, spec: &Bson) -> DocumentStoreResult<usize> {
    match spec {
        Bson::Int32(value) if *value >= 0 => Ok(*value as usize),
        Bson::Int64(value) if *value >= 0 => Ok(*value as usize),
        Bson::Double(value) if *value >= 0.0 && value.fract() == 0.0 => Ok(*value as usize),
        _ => Err(stage_error(format!("invalid argument to {stage} stage: expected a non-negative integer"))),
    }
}

/// Int32 when it fits, Int64 otherwise.
fn integer(value: i64) -> Bson {
    i32::try_from(value)
        .map(Bson::Int32)
        .unwrap_or(Bson::Int64(value))
}

/// Evaluates an expression. `None` means a field path that doesn't resolve.
fn evaluate(document: &Document, expression: &Bson) -> DocumentStoreResult<Option<Bson>> {
    match expression {
        Bson::String(path) if path.starts_with('$') => Ok(field_path(document, &path[1..])),
        Bson::Document(inner) => match inner.iter().next() {
            Some((operator, operand)) if operator.starts_with('$') => match operator.as_str() {
                "$literal" if inner.len() == 1 => Ok(Some(operand.clone())),
                other => Err(stage_error(format!("Unrecognized expression '{other}'"))),
            },
            _ => {
                let mut evaluated = Document::new();
                for (field, nested) in inner {
                    if let Some(value) = evaluate(document, nested)? {
                        evaluated.insert(field.clone(), value);
                    }
                }
                Ok(Some(Bson::Document(evaluated)))
            },
        },
        Bson::Array(items) => Ok(Some(Bson::Array(
            items
                .iter()
                .map(|item| evaluate(document, item).map(|value| value.unwrap_or(Bson::Null)))
                .collect::<DocumentStoreResult<Vec<_>>>()?,
        ))),
        literal => Ok(Some(literal.clone())),
    }
}

fn field_path(document: &Document, path: &str) -> Option<Bson> {
    let values = resolve(document, path);

    match (path.contains('.'), values.as_slice()) {
        (_, []) => None,
        (false, [value]) => Some((*value).clone()),
        (true, [value]) if !matches!(document.get(path.split('.').next().unwrap_or(path)), Some(Bson::Array(_))) => {
            Some((*value).clone())
        },
        (_, values) => Some(Bson::Array(values.iter().map(|value| (*value).clone()).collect())),
    }
}

fn is_truthy_flag(value: &Bson) -> Option<bool> {
    match value {
        Bson::Boolean(flag) => Some(*flag),
        other => as_number(other).map(|number| number != 0.0),
    }
}

fn project(document: &Document, spec: &Document) -> DocumentStoreResult<Document> {
    let mut exclude_id = false;
    let mut inclusions = vec![];
    let mut exclusions = vec![];

    for (field, value) in spec {
        match is_truthy_flag(value) {
            Some(false) if field == "_id" => exclude_id = true,
            Some(false) => exclusions.push(field.as_str()),
            Some(true) => inclusions.push((field.as_str(), None)),
            None => inclusions.push((field.as_str(), Some(value))),
        }
    }

    if !inclusions.is_empty() && !exclusions.is_empty() {
        return Err(stage_error("Invalid $project: cannot mix inclusion and exclusion"));
    }

    if inclusions.is_empty() {
        let mut projected = document.clone();
        for field in exclusions {
            projected.remove(field);
        }
        if exclude_id {
            projected.remove("_id");
        }
        return Ok(projected);
    }

    let mut projected = Document::new();
    if !exclude_id {
        if let Some(id) = document.get("_id") {
            projected.insert("_id", id.clone());
        }
    }

    for (field, expression) in inclusions {
        let value = match expression {
            Some(expression) => evaluate(document, expression)?,
            None => document.get(field).cloned(),
        };
        if let Some(value) = value {
            projected.insert(field, value);
        }
    }

    Ok(projected)
}

#[derive(Debug)]
enum Accumulator {
    Sum(Bson),
    Avg { total: f64, count: u64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
    Last(Bson),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
    Count(i64),
}

impl Accumulator {
    fn new(operator: &str) -> DocumentStoreResult<Self> {
        Ok(match operator {
            "$sum" => Accumulator::Sum(Bson::Int32(0)),
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Bson::Null),
            "$push" => Accumulator::Push(vec![]),
            "$addToSet" => Accumulator::AddToSet(vec![]),
            "$count" => Accumulator::Count(0),
            other => return Err(stage_error(format!("unknown group operator '{other}'"))),
        })
    }

    fn accumulate(&mut self, value: Option<Bson>) {
        match self {
            Accumulator::Sum(total) => {
                if let Some(sum) = value.as_ref().and_then(|value| add(total, value)) {
                    *total = sum;
                }
            },
            Accumulator::Avg { total, count } => {
                if let Some(number) = value.as_ref().and_then(as_number) {
                    *total += number;
                    *count += 1;
                }
            },
            Accumulator::Min(current) => keep_extreme(current, value, Ordering::Less),
            Accumulator::Max(current) => keep_extreme(current, value, Ordering::Greater),
            Accumulator::First(first) => {
                if first.is_none() {
                    *first = Some(value.unwrap_or(Bson::Null));
                }
            },
            Accumulator::Last(last) => *last = value.unwrap_or(Bson::Null),
            Accumulator::Push(values) => values.extend(value),
            Accumulator::AddToSet(values) => {
                if let Some(value) = value {
                    if !values.iter().any(|existing| values_equal(existing, &value)) {
                        values.push(value);
                    }
                }
            },
            Accumulator::Count(count) => *count += 1,
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum(total) => total,
            Accumulator::Avg { count: 0, .. } => Bson::Null,
            Accumulator::Avg { total, count } => Bson::Double(total / count as f64),
            Accumulator::Min(value) | Accumulator::Max(value) | Accumulator::First(value) => {
                value.unwrap_or(Bson::Null)
            },
            Accumulator::Last(value) => value,
            Accumulator::Push(values) | Accumulator::AddToSet(values) => Bson::Array(values),
            Accumulator::Count(count) => integer(count),
        }
    }
}

/// Replaces `current` when `value` orders `wanted` relative to it. Nulls are skipped.
fn keep_extreme(current: &mut Option<Bson>, value: Option<Bson>, wanted: Ordering) {
    let Some(value) = value.filter(|value| !matches!(value, Bson::Null | Bson::Undefined)) else {
        return;
    };

    if current
        .as_ref()
        .is_none_or(|existing| compare(&value, existing) == wanted)
    {
        *current = Some(value);
    }
}

struct Group {
    key: Bson,
    accumulators: Vec<(String, Accumulator)>,
}

fn group(documents: &[Document], spec: &Bson) -> DocumentStoreResult<Vec<Document>> {
    let spec = spec
        .as_document()
        .ok_or_else(|| stage_error("a group's fields must be specified in an object"))?;
    let key_expression = spec
        .get("_id")
        .ok_or_else(|| stage_error("a group specification must include an _id"))?;

    let fields = spec
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .map(|(field, accumulator)| {
            let accumulator = accumulator
                .as_document()
                .filter(|accumulator| accumulator.len() == 1)
                .ok_or_else(|| stage_error(format!("The field '{field}' must be an accumulator object")))?;
            let (operator, argument) = accumulator
                .iter()
                .next()
                .ok_or_else(|| stage_error(format!("The field '{field}' must specify one accumulator")))?;
            Accumulator::new(operator)?;
            Ok((field.as_str(), operator.as_str(), argument))
        })
        .collect::<DocumentStoreResult<Vec<_>>>()?;

    // Groups are emitted in first-seen order.
    let mut groups: Vec<Group> = vec![];

    for document in documents {
        let key = evaluate(document, key_expression)?.unwrap_or(Bson::Null);

        let index = match groups.iter().position(|group| values_equal(&group.key, &key)) {
            Some(index) => index,
            None => {
                let accumulators = fields
                    .iter()
                    .map(|(field, operator, _)| Ok((field.to_string(), Accumulator::new(operator)?)))
                    .collect::<DocumentStoreResult<Vec<_>>>()?;
                groups.push(Group { key, accumulators });
                groups.len() - 1
            },
        };

        for ((_, accumulator), (_, _, argument)) in groups[index].accumulators.iter_mut().zip(&fields) {
            accumulator.accumulate(evaluate(document, argument)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|group| {
            Document::from_iter(
                std::iter::once(("_id".to_string(), group.key)).chain(
                    group
                        .accumulators
                        .into_iter()
                        .map(|(field, accumulator)| (field, accumulator.finish())),
                ),
            )
        })
        .collect())
}

fn unwind(documents: Vec<Document>, spec: &Bson) -> DocumentStoreResult<Vec<Document>> {
    let (path, preserve) = match spec {
        Bson::String(path) => (path.as_str(), false),
        Bson::Document(options) => (
            options
                .get_str("path")
                .map_err(|_| stage_error("$unwind requires a path"))?,
            options
                .get_bool("preserveNullAndEmptyArrays")
                .unwrap_or(false),
        ),
        _ => return Err(stage_error("expected either a string or an object as specification for $unwind stage")),
    };

    let field = path
        .strip_prefix('$')
        .filter(|field| !field.is_empty() && !field.contains('.'))
        .ok_or_else(|| stage_error("$unwind path must be a top-level field path prefixed by '$'"))?;

    let mut unwound = vec![];

    for document in documents {
        match document.get(field) {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = document.clone();
                    copy.insert(field, item.clone());
                    unwound.push(copy);
                }
            },
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    unwound.push(document);
                }
            },
            Some(_) => unwound.push(document),
        }
    }

    Ok(unwound)
}
