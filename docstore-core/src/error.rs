//! Error types and result types for document store operations.
//!
//! Backends report failures with the raw variants ([`DocumentStoreError::Backend`],
//! [`DocumentStoreError::DocumentValidation`], [`DocumentStoreError::CollectionAlreadyExists`]).
//! The client attaches the operation name and collection through
//! [`DocumentStoreError::with_context`] before the error reaches the caller.

use std::path::PathBuf;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Opening the connection or the liveness probe failed.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The store became unreachable while running an operation.
    #[error("{operation} on collection {collection} could not reach the store: {message}")]
    Unreachable {
        operation: &'static str,
        collection: String,
        message: String,
    },
    /// No file with the requested name exists below the schema root.
    #[error("Schema file not found: {filename} in {root}")]
    SchemaNotFound {
        filename: String,
        root: PathBuf,
    },
    /// The store rejected a write against the collection validator.
    #[error("{operation} on collection {collection} rejected by validator: {message}")]
    ValidationRejected {
        operation: &'static str,
        collection: String,
        message: String,
    },
    /// Any other driver-level failure, annotated with where it happened.
    #[error("{operation} on collection {collection} failed: {message}")]
    StoreOperation {
        operation: &'static str,
        collection: String,
        message: String,
    },
    /// Raw backend failure without operation context.
    #[error("Backend error: {0}")]
    Backend(String),
    /// Raw validator rejection without operation context.
    #[error("Document failed validation: {0}")]
    DocumentValidation(String),
    /// The collection passed to `create_collection` already exists.
    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),
    /// The document or schema has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Reading a local file failed.
    #[error("I/O error: {0}")]
    Io(String),
    /// Configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl DocumentStoreError {
    /// Attaches the operation name and collection to a raw backend error.
    ///
    /// Connection failures become [`DocumentStoreError::Unreachable`], and
    /// errors that already carry context are returned untouched.
    pub fn with_context(self, operation: &'static str, collection: &str) -> Self {
        match self {
            DocumentStoreError::Connection(message) => DocumentStoreError::Unreachable {
                operation,
                collection: collection.to_string(),
                message,
            },
            DocumentStoreError::DocumentValidation(message) => DocumentStoreError::ValidationRejected {
                operation,
                collection: collection.to_string(),
                message,
            },
            DocumentStoreError::Backend(message)
            | DocumentStoreError::InvalidDocument(message)
            | DocumentStoreError::Serialization(message) => DocumentStoreError::StoreOperation {
                operation,
                collection: collection.to_string(),
                message,
            },
            DocumentStoreError::CollectionAlreadyExists(name) => DocumentStoreError::StoreOperation {
                operation,
                collection: collection.to_string(),
                message: format!("collection {name} already exists"),
            },
            other => other,
        }
    }

    /// Whether the error means the store could not be reached.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            DocumentStoreError::Connection(_) | DocumentStoreError::Unreachable { .. }
        )
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DocumentStoreError {
    fn from(err: std::io::Error) -> Self {
        DocumentStoreError::Io(err.to_string())
    }
}

impl From<figment::Error> for DocumentStoreError {
    fn from(err: figment::Error) -> Self {
        DocumentStoreError::Config(err.to_string())
    }
}
