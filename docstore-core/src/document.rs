//! Conversions between typed records and the store's BSON documents.
//!
//! The client speaks [`bson::Document`] natively. These helpers let callers
//! keep their records as plain serde types and convert at the edge.
//!
//! # Example
//!
//! ```ignore
//! use docstore::document::{to_document, from_document};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! pub struct User {
//!     pub name: String,
//! }
//!
//! let document = to_document(&User { name: "Ann".into() })?;
//! let user: User = from_document(document)?;
//! ```

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Serializes a record into a BSON document.
///
/// # Errors
///
/// Returns an error if serialization fails or the value does not serialize to a map.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> DocumentStoreResult<Document> {
    match serialize_to_bson(value)? {
        Bson::Document(document) => Ok(document),
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "expected a document, got {:?}",
            other.element_type(),
        ))),
    }
}

/// Deserializes a BSON document into a record.
///
/// # Errors
///
/// Returns an error if deserialization fails or the structure is invalid.
pub fn from_document<T: DeserializeOwned>(document: Document) -> DocumentStoreResult<T> {
    Ok(deserialize_from_bson(Bson::Document(document))?)
}
