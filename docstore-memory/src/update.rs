//! Update operators: `$set`, `$unset` and `$inc`.

use bson::{Bson, Document};

use docstore_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::evaluator::values_equal;

/// Applies an operator-form update in place and reports whether anything changed.
///
/// The update is validated before any field is touched, so a rejected update
/// leaves the document as it was.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> DocumentStoreResult<bool> {
    check(update)?;

    let mut changed = false;

    for (operator, fields) in update {
        let Bson::Document(fields) = fields else { continue };

        for (path, value) in fields {
            changed |= match operator.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$unset" => unset_path(document, path),
                "$inc" => increment_path(document, path, value)?,
                _ => false,
            };
        }
    }

    Ok(changed)
}

fn check(update: &Document) -> DocumentStoreResult<()> {
    if update.is_empty() {
        return Err(DocumentStoreError::Backend("update document must not be empty".to_string()));
    }

    for (operator, fields) in update {
        if !operator.starts_with('$') {
            return Err(DocumentStoreError::Backend(format!(
                "update document requires atomic operators, found field {operator}"
            )));
        }

        if !matches!(operator.as_str(), "$set" | "$unset" | "$inc") {
            return Err(DocumentStoreError::Backend(format!("Unknown modifier: {operator}")));
        }

        let fields = fields.as_document().ok_or_else(|| {
            DocumentStoreError::Backend(format!("Modifiers operate on fields but {operator} was not given an object"))
        })?;

        for (path, value) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(DocumentStoreError::Backend(
                    "Performing an update on the path '_id' would modify the immutable field '_id'".to_string(),
                ));
            }

            if operator == "$inc" && !is_numeric(value) {
                return Err(DocumentStoreError::Backend(format!("Cannot increment with non-numeric argument {path}")));
            }
        }
    }

    Ok(())
}

fn is_numeric(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

/// Walks to the parent of the last path segment, creating documents on the way.
fn parent_mut<'a>(document: &'a mut Document, path: &'a str) -> DocumentStoreResult<(&'a mut Document, &'a str)> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().unwrap_or(path);
    let mut current = document;

    for segment in segments {
        if !current.contains_key(segment) {
            current.insert(segment, Document::new());
        }

        current = match current.get_mut(segment) {
            Some(Bson::Document(inner)) => inner,
            _ => {
                return Err(DocumentStoreError::Backend(format!(
                    "Cannot create field '{leaf}' in element {{{segment}: ...}}"
                )));
            },
        };
    }

    Ok((current, leaf))
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<bool> {
    let (parent, leaf) = parent_mut(document, path)?;

    if parent.get(leaf).is_some_and(|existing| existing == &value) {
        return Ok(false);
    }

    parent.insert(leaf, value);
    Ok(true)
}

fn unset_path(document: &mut Document, path: &str) -> bool {
    let mut segments = path.split('.').peekable();
    let mut current = document;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            return current.remove(segment).is_some();
        }

        current = match current.get_mut(segment) {
            Some(Bson::Document(inner)) => inner,
            _ => return false,
        };
    }

    false
}

fn increment_path(document: &mut Document, path: &str, amount: &Bson) -> DocumentStoreResult<bool> {
    let (parent, leaf) = parent_mut(document, path)?;

    let next = match parent.get(leaf) {
        None => amount.clone(),
        Some(current) => add(current, amount).ok_or_else(|| {
            DocumentStoreError::Backend(format!("Cannot apply $inc to a value of non-numeric type at {path}"))
        })?,
    };

    let changed = parent.get(leaf).is_none_or(|current| !values_equal(current, &next));
    parent.insert(leaf, next);

    Ok(changed)
}

/// Numeric addition with the store's widening rules.
pub(crate) fn add(left: &Bson, right: &Bson) -> Option<Bson> {
    Some(match (left, right) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Bson::Int32(a), Bson::Int64(b)) | (Bson::Int64(b), Bson::Int32(a)) => Bson::Int64(i64::from(*a).checked_add(*b)?),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.checked_add(*b)?),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Double(a), Bson::Int32(b)) | (Bson::Int32(b), Bson::Double(a)) => Bson::Double(a + f64::from(*b)),
        (Bson::Double(a), Bson::Int64(b)) | (Bson::Int64(b), Bson::Double(a)) => Bson::Double(a + *b as f64),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_merges_fields_and_reports_changes() {
        let mut document = doc! { "_id": 1, "name": "Ann", "age": 31 };

        assert!(apply_update(&mut document, &doc! { "$set": { "age": 32 } }).unwrap());
        assert_eq!(document, doc! { "_id": 1, "name": "Ann", "age": 32 });

        assert!(!apply_update(&mut document, &doc! { "$set": { "age": 32 } }).unwrap());
    }

    #[test]
    fn set_creates_nested_documents() {
        let mut document = doc! { "_id": 1 };

        apply_update(&mut document, &doc! { "$set": { "profile.city": "Oslo" } }).unwrap();

        assert_eq!(document, doc! { "_id": 1, "profile": { "city": "Oslo" } });
    }

    #[test]
    fn unset_and_increment() {
        let mut document = doc! { "_id": 1, "visits": 2, "note": "x" };

        apply_update(&mut document, &doc! { "$unset": { "note": "" }, "$inc": { "visits": 3, "streak": 1 } }).unwrap();

        assert_eq!(document, doc! { "_id": 1, "visits": 5, "streak": 1 });
    }

    #[test]
    fn rejected_updates_leave_document_untouched() {
        let original = doc! { "_id": 1, "name": "Ann" };
        let mut document = original.clone();

        assert!(apply_update(&mut document, &doc! { "name": "Bob" }).is_err());
        assert!(apply_update(&mut document, &doc! { "$set": { "_id": 2 } }).is_err());
        assert!(apply_update(&mut document, &doc! { "$push": { "tags": "a" } }).is_err());
        assert!(apply_update(&mut document, &doc! { "$set": { "age": 1 }, "$inc": { "name": "a" } }).is_err());

        assert_eq!(document, original);
    }

    #[test]
    fn integer_addition_widens_on_overflow() {
        assert_eq!(add(&Bson::Int32(i32::MAX), &Bson::Int32(1)), Some(Bson::Int64(i64::from(i32::MAX) + 1)));
        assert_eq!(add(&Bson::Int32(1), &Bson::Double(0.5)), Some(Bson::Double(1.5)));
        assert_eq!(add(&Bson::String("a".into()), &Bson::Int32(1)), None);
    }
}
