//! `$jsonSchema` validation for collection validators.
//!
//! Supported keywords: `bsonType`, `type`, `required`, `properties`,
//! `additionalProperties`, `enum`, `minimum`, `maximum`, `minLength`,
//! `maxLength`, `items`, `minItems`, `maxItems`, plus the annotations `title`
//! and `description`. Any other keyword is rejected when the validator is
//! installed instead of being silently ignored.

use std::cmp::Ordering;

use bson::{Bson, Document};

use docstore_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::evaluator::{as_number, compare, values_equal};

const BSON_TYPES: [&str; 16] = [
    "double", "string", "object", "array", "binData", "objectId", "bool", "date",
    "null", "regex", "int", "timestamp", "long", "decimal", "number", "undefined",
];

const JSON_TYPES: [&str; 6] = ["object", "array", "string", "number", "boolean", "null"];

fn invalid(message: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::Backend(format!("$jsonSchema keyword invalid: {}", message.into()))
}

/// Checks that a schema only uses supported keywords with well-formed operands.
pub(crate) fn check(schema: &Document) -> DocumentStoreResult<()> {
    for (keyword, operand) in schema {
        match keyword.as_str() {
            "bsonType" => check_type_names(keyword, operand, &BSON_TYPES)?,
            "type" => check_type_names(keyword, operand, &JSON_TYPES)?,
            "required" => {
                let names = operand
                    .as_array()
                    .ok_or_else(|| invalid("required must be an array"))?;
                if names.iter().any(|name| name.as_str().is_none()) {
                    return Err(invalid("required must only contain strings"));
                }
            },
            "properties" => {
                let properties = operand
                    .as_document()
                    .ok_or_else(|| invalid("properties must be an object"))?;
                for (name, property) in properties {
                    let property = property
                        .as_document()
                        .ok_or_else(|| invalid(format!("property {name} must be an object")))?;
                    check(property)?;
                }
            },
            "additionalProperties" => match operand {
                Bson::Boolean(_) => {},
                Bson::Document(inner) => check(inner)?,
                _ => return Err(invalid("additionalProperties must be a boolean or an object")),
            },
            "items" => check(
                operand
                    .as_document()
                    .ok_or_else(|| invalid("items must be an object"))?,
            )?,
            "enum" => {
                if operand.as_array().is_none_or(|values| values.is_empty()) {
                    return Err(invalid("enum must be a nonempty array"));
                }
            },
            "minimum" | "maximum" | "minLength" | "maxLength" | "minItems" | "maxItems" => {
                if as_number(operand).is_none() {
                    return Err(invalid(format!("{keyword} must be a number")));
                }
            },
            "title" | "description" => {
                if operand.as_str().is_none() {
                    return Err(invalid(format!("{keyword} must be a string")));
                }
            },
            other => return Err(invalid(format!("unsupported keyword {other}"))),
        }
    }

    Ok(())
}

fn check_type_names(keyword: &str, operand: &Bson, known: &[&str]) -> DocumentStoreResult<()> {
    let names = match operand {
        Bson::String(name) => vec![name.as_str()],
        Bson::Array(items) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(|| invalid(format!("{keyword} must list strings"))))
            .collect::<DocumentStoreResult<Vec<_>>>()?,
        _ => return Err(invalid(format!("{keyword} must be a string or an array"))),
    };

    match names.iter().find(|name| !known.contains(name)) {
        Some(unknown) => Err(invalid(format!("unknown {keyword} {unknown}"))),
        None => Ok(()),
    }
}

pub(crate) fn conforms_document(document: &Document, schema: &Document) -> bool {
    conforms_fields(document, schema) && conforms_value(&Bson::Document(document.clone()), schema, false)
}

fn has_bson_type(value: &Bson, name: &str) -> bool {
    match name {
        "double" => matches!(value, Bson::Double(_)),
        "string" => matches!(value, Bson::String(_)),
        "object" => matches!(value, Bson::Document(_)),
        "array" => matches!(value, Bson::Array(_)),
        "binData" => matches!(value, Bson::Binary(_)),
        "objectId" => matches!(value, Bson::ObjectId(_)),
        "bool" | "boolean" => matches!(value, Bson::Boolean(_)),
        "date" => matches!(value, Bson::DateTime(_)),
        "null" => matches!(value, Bson::Null),
        "regex" => matches!(value, Bson::RegularExpression(_)),
        "int" => matches!(value, Bson::Int32(_)),
        "timestamp" => matches!(value, Bson::Timestamp(_)),
        "long" => matches!(value, Bson::Int64(_)),
        "decimal" => matches!(value, Bson::Decimal128(_)),
        "number" => matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)),
        "undefined" => matches!(value, Bson::Undefined),
        _ => false,
    }
}

fn type_matches(value: &Bson, operand: &Bson) -> bool {
    match operand {
        Bson::String(name) => has_bson_type(value, name),
        Bson::Array(names) => names
            .iter()
            .filter_map(Bson::as_str)
            .any(|name| has_bson_type(value, name)),
        _ => false,
    }
}

/// Object keywords, checked against the document's own fields.
fn conforms_fields(document: &Document, schema: &Document) -> bool {
    if let Some(required) = schema.get("required").and_then(Bson::as_array) {
        if required
            .iter()
            .filter_map(Bson::as_str)
            .any(|name| !document.contains_key(name))
        {
            return false;
        }
    }

    let properties = schema.get("properties").and_then(Bson::as_document);

    for (name, value) in document {
        match properties.and_then(|properties| properties.get(name)).and_then(Bson::as_document) {
            Some(property) => {
                if !conforms_value(value, property, true) {
                    return false;
                }
            },
            None => match schema.get("additionalProperties") {
                Some(Bson::Boolean(false)) => return false,
                Some(Bson::Document(additional)) => {
                    if !conforms_value(value, additional, true) {
                        return false;
                    }
                },
                _ => {},
            },
        }
    }

    true
}

/// Value keywords. Keywords that don't apply to the value's type are ignored.
fn conforms_value(value: &Bson, schema: &Document, with_fields: bool) -> bool {
    for (keyword, operand) in schema {
        let satisfied = match keyword.as_str() {
            "bsonType" | "type" => type_matches(value, operand),
            "enum" => operand
                .as_array()
                .is_some_and(|allowed| allowed.iter().any(|candidate| values_equal(candidate, value))),
            "minimum" => as_number(value).is_none() || compare(value, operand) != Ordering::Less,
            "maximum" => as_number(value).is_none() || compare(value, operand) != Ordering::Greater,
            "minLength" => within(value.as_str().map(|s| s.chars().count()), operand, Ordering::Less),
            "maxLength" => within(value.as_str().map(|s| s.chars().count()), operand, Ordering::Greater),
            "minItems" => within(value.as_array().map(Vec::len), operand, Ordering::Less),
            "maxItems" => within(value.as_array().map(Vec::len), operand, Ordering::Greater),
            "items" => match (value, operand) {
                (Bson::Array(items), Bson::Document(item_schema)) => items
                    .iter()
                    .all(|item| conforms_value(item, item_schema, true)),
                _ => true,
            },
            _ => true,
        };

        if !satisfied {
            return false;
        }
    }

    match value {
        Bson::Document(inner) if with_fields => conforms_fields(inner, schema),
        _ => true,
    }
}

/// True when `length` is absent (keyword not applicable) or not past the bound.
fn within(length: Option<usize>, bound: &Bson, rejected: Ordering) -> bool {
    match (length, as_number(bound)) {
        (Some(length), Some(bound)) => (length as f64).partial_cmp(&bound) != Some(rejected),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn workout_schema() -> Document {
        doc! {
            "bsonType": "object",
            "required": ["user_id", "log_date", "workout_content"],
            "properties": {
                "user_id": { "bsonType": "string" },
                "log_date": { "bsonType": "date" },
                "workout_content": { "bsonType": "string", "minLength": 1 },
                "total_calories_burnt": { "bsonType": ["int", "long", "double"], "minimum": 0 },
                "tags": { "bsonType": "array", "items": { "bsonType": "string" } },
                "is_deleted": { "bsonType": "bool" },
            },
        }
    }

    fn log() -> Document {
        doc! {
            "user_id": "6741f0e75b6291baa9b7a273",
            "log_date": bson::DateTime::from_millis(1_732_492_800_000),
            "workout_content": "Running and Yoga",
            "total_calories_burnt": 500,
            "is_deleted": false,
        }
    }

    #[test]
    fn valid_document_conforms() {
        assert!(check(&workout_schema()).is_ok());
        assert!(conforms_document(&log(), &workout_schema()));
    }

    #[test]
    fn missing_required_field_fails() {
        let mut document = log();
        document.remove("workout_content");

        assert!(!conforms_document(&document, &workout_schema()));
    }

    #[test]
    fn wrong_type_and_bounds_fail() {
        let mut negative = log();
        negative.insert("total_calories_burnt", -5);
        let mut wrong_type = log();
        wrong_type.insert("is_deleted", "no");
        let mut bad_items = log();
        bad_items.insert("tags", vec![Bson::Int32(1)]);

        assert!(!conforms_document(&negative, &workout_schema()));
        assert!(!conforms_document(&wrong_type, &workout_schema()));
        assert!(!conforms_document(&bad_items, &workout_schema()));
    }

    #[test]
    fn closed_objects_reject_extra_fields() {
        let schema = doc! {
            "bsonType": "object",
            "properties": { "_id": {}, "name": { "bsonType": "string" } },
            "additionalProperties": false,
        };

        assert!(conforms_document(&doc! { "name": "Ann" }, &schema));
        assert!(!conforms_document(&doc! { "name": "Ann", "age": 31 }, &schema));
    }

    #[test]
    fn nested_objects_are_checked() {
        let schema = doc! {
            "properties": {
                "profile": { "bsonType": "object", "required": ["city"] },
            },
        };

        assert!(conforms_document(&doc! { "profile": { "city": "Oslo" } }, &schema));
        assert!(!conforms_document(&doc! { "profile": { "zip": "0150" } }, &schema));
    }

    #[test]
    fn unsupported_keywords_are_rejected() {
        assert!(check(&doc! { "pattern": "^a" }).is_err());
        assert!(check(&doc! { "bsonType": "text" }).is_err());
        assert!(check(&doc! { "required": "name" }).is_err());
    }
}
