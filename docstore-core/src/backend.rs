//! Storage backend abstraction for the document store client.
//!
//! This module defines the driver seam the client is written against. A backend is
//! an open connection to one database; a [`StoreBackendBuilder`] opens one from
//! [`ConnectionSettings`] each time the client transitions from disconnected to
//! connected.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The raw document primitives (no soft-delete policy)
//! - [`StoreBackendBuilder`]: Factory trait for opening backend connections
//!
//! # Error Contract
//!
//! Backends return the raw error variants and never attach operation context:
//!
//! - [`DocumentStoreError::Connection`] when the store cannot be reached
//! - [`DocumentStoreError::DocumentValidation`] when a validator rejects a write
//! - [`DocumentStoreError::CollectionAlreadyExists`] from `create_collection`
//! - [`DocumentStoreError::Backend`] for everything else
//!
//! [`DocumentStoreError::Connection`]: crate::error::DocumentStoreError::Connection
//! [`DocumentStoreError::DocumentValidation`]: crate::error::DocumentStoreError::DocumentValidation
//! [`DocumentStoreError::CollectionAlreadyExists`]: crate::error::DocumentStoreError::CollectionAlreadyExists
//! [`DocumentStoreError::Backend`]: crate::error::DocumentStoreError::Backend

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::{self, Debug};

use crate::{error::DocumentStoreResult, outcome::UpdateOutcome, query::FindOptions};

/// How strictly a collection validator is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationLevel {
    /// No validation.
    Off,
    /// Every insert and update is validated.
    #[default]
    Strict,
    /// Only documents that already satisfy the validator are checked on update.
    Moderate,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Off => "off",
            ValidationLevel::Strict => "strict",
            ValidationLevel::Moderate => "moderate",
        }
    }
}

/// Everything a builder needs to open a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Full connection URI, credentials included.
    pub uri: String,
    /// The URI with its password masked, for logging.
    pub redacted_uri: String,
    /// The database every operation targets.
    pub database: String,
}

impl Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("uri", &self.redacted_uri)
            .field("database", &self.database)
            .finish()
    }
}

/// Raw document primitives over one database.
///
/// Implementations must be safe for concurrent use. Pooling of physical
/// connections, if any, is the implementation's business; the client shares
/// one backend between all in-flight operations.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Round-trips to the store to confirm the connection is usable.
    async fn ping(&self) -> DocumentStoreResult<()>;

    /// Creates an empty collection.
    ///
    /// Returns [`CollectionAlreadyExists`](crate::error::DocumentStoreError::CollectionAlreadyExists)
    /// when the collection is already present.
    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Replaces the validator of an existing collection (the `collMod` command).
    async fn modify_validator(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
    ) -> DocumentStoreResult<()>;

    /// Creates an index over `keys` (field name to direction, in order).
    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        unique: bool,
    ) -> DocumentStoreResult<()>;

    /// Inserts one document and returns its `_id`, generated if absent.
    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson>;

    /// Inserts documents and returns their `_id`s in input order.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Returns the first document matching `filter`, if any.
    async fn find_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<Option<Document>>;

    /// Returns every document matching `filter`, sorted then skipped then limited.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Applies an update document (operator form, e.g. `$set`) to the first match.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies an update document to every match.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Physically removes the first match and returns the number removed.
    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64>;

    /// Physically removes every match and returns the number removed.
    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64>;

    /// Runs an aggregation pipeline and realizes its output.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Counts the documents matching `filter`.
    async fn count_documents(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64>;

    /// Releases the connection. Operations after shutdown are undefined.
    ///
    /// The default implementation is a no-op, but backends with external
    /// connections should override this.
    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

/// Opens backend connections.
///
/// Called once per reconnect, so it borrows itself rather than being consumed.
#[async_trait]
pub trait StoreBackendBuilder: Send + Sync {
    type Backend: StoreBackend + 'static;

    async fn build(&self, settings: &ConnectionSettings) -> DocumentStoreResult<Self::Backend>;
}
