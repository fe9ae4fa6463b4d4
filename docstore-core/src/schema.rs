//! Discovery and loading of collection validation schemas.
//!
//! Schemas are JSON files living anywhere below a schema root directory. A
//! schema is associated with its collection purely by file name, so
//! `schema/workout/daily_workout_logs_schema.json` is found by the name
//! `daily_workout_logs_schema.json`.

use std::{fs, path::{Path, PathBuf}};

use bson::{Bson, Document, ser::serialize_to_bson};
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A directory searched recursively for schema files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRoot {
    root: PathBuf,
}

impl SchemaRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Finds the file called `filename` below the root.
    ///
    /// Directory entries are visited in file-name order, so when the same name
    /// appears more than once the match is deterministic.
    pub fn locate(&self, filename: &str) -> DocumentStoreResult<PathBuf> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .find(|entry| entry.file_type().is_file() && entry.file_name() == filename)
            .map(|entry| entry.into_path())
            .ok_or_else(|| DocumentStoreError::SchemaNotFound {
                filename: filename.to_string(),
                root: self.root.clone(),
            })
    }

    /// Locates and parses the schema called `filename` into a validator document.
    pub fn load(&self, filename: &str) -> DocumentStoreResult<Document> {
        let path = self.locate(filename)?;
        let content = fs::read_to_string(&path)?;
        let value: Value = serde_json::from_str(&content)?;

        tracing::debug!(schema = filename, path = %path.display(), "Loaded validation schema");

        match serialize_to_bson(&value)? {
            Bson::Document(document) => Ok(document),
            _ => Err(DocumentStoreError::InvalidDocument(format!(
                "schema {} must be a JSON object",
                path.display(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn finds_schema_in_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "workout/daily_workout_logs_schema.json",
            r#"{"$jsonSchema": {"bsonType": "object", "required": ["user_id"]}}"#,
        );

        let schema = SchemaRoot::new(dir.path())
            .load("daily_workout_logs_schema.json")
            .unwrap();

        let json_schema = schema.get_document("$jsonSchema").unwrap();
        assert_eq!(json_schema.get_str("bsonType").ok(), Some("object"));
    }

    #[test]
    fn missing_schema_is_reported_with_root() {
        let dir = tempfile::tempdir().unwrap();

        let err = SchemaRoot::new(dir.path()).load("users_schema.json").unwrap_err();

        match err {
            DocumentStoreError::SchemaNotFound { filename, root } => {
                assert_eq!(filename, "users_schema.json");
                assert_eq!(root, dir.path());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn directories_do_not_match_by_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("users_schema.json")).unwrap();

        assert!(SchemaRoot::new(dir.path()).locate("users_schema.json").is_err());
    }

    #[test]
    fn non_object_schema_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "list_schema.json", "[1, 2, 3]");

        let err = SchemaRoot::new(dir.path()).load("list_schema.json").unwrap_err();

        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken_schema.json", "{ not json");

        let err = SchemaRoot::new(dir.path()).load("broken_schema.json").unwrap_err();

        assert!(matches!(err, DocumentStoreError::Serialization(_)));
    }
}
