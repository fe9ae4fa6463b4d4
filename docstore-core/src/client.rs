//! The soft-delete aware document store client.
//!
//! [`DocumentStoreClient`] owns the connection to one database and layers three
//! policies over the raw [`StoreBackend`] primitives:
//!
//! - **Soft delete** - documents are stamped `is_deleted: false` on insert,
//!   deletes flag instead of removing by default, and `find_one`/`find_many`
//!   hide flagged documents unless asked not to. `update_*`, `aggregate`, and
//!   `count_documents` do not touch the flag; callers filter explicitly there.
//! - **Schema enforcement** - [`ensure_validation`](DocumentStoreClient::ensure_validation)
//!   installs a file-resident schema as a strict collection validator.
//! - **Connection lifecycle** - the connection is opened lazily, verified with
//!   a ping, and released by [`close`](DocumentStoreClient::close) or by
//!   dropping a [`Session`].
//!
//! # Connection states
//!
//! The client is either disconnected or connected. It only becomes connected
//! after a successful liveness probe, and only becomes disconnected again
//! through an explicit close. Any operation on a disconnected client
//! reconnects first. Concurrent lazy connects are serialized so exactly one
//! backend is opened.
//!
//! Closing while operations are in flight is not supported: callers must drain
//! in-flight calls before shutting the client down.
//!
//! # Example
//!
//! ```ignore
//! use docstore::{prelude::*, mongodb::MongoDbStore};
//! use bson::doc;
//!
//! let client = DocumentStoreClient::new(MongoDbStore::builder(), StoreConfig::load()?, None);
//! let session = client.session().await?;
//!
//! let id = session.insert_one("users", doc! { "name": "Ann" }).await?;
//! session.delete_one("users", &doc! { "_id": id.clone() }, true).await?;
//!
//! assert!(session.find_one("users", &doc! { "_id": id }, false).await?.is_none());
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bson::{Bson, Document};
use mea::mutex::Mutex as AsyncMutex;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    backend::{ConnectionSettings, StoreBackend, StoreBackendBuilder, ValidationLevel},
    collection::Collection,
    config::StoreConfig,
    document::{from_document, to_document},
    error::{DocumentStoreError, DocumentStoreResult},
    outcome::{DeleteOutcome, UpdateOutcome},
    query::{FindOptions, mark_live, scoped_query, set_fields, soft_delete_update},
    schema::SchemaRoot,
    session::Session,
};

enum ConnectionState<B> {
    Disconnected,
    Connected(Arc<B>),
}

/// Policy-enforcing client over one database.
///
/// # Type Parameters
///
/// * `C` - The builder used to open backend connections
pub struct DocumentStoreClient<C: StoreBackendBuilder> {
    builder: C,
    settings: ConnectionSettings,
    schemas: SchemaRoot,
    state: Mutex<ConnectionState<C::Backend>>,
    connect_gate: AsyncMutex<()>,
}

impl<C: StoreBackendBuilder> DocumentStoreClient<C> {
    /// Creates a disconnected client.
    ///
    /// `database` overrides the configured database name when given. No
    /// connection is attempted until the first operation or [`connect`](Self::connect).
    pub fn new(builder: C, config: StoreConfig, database: Option<&str>) -> Self {
        let config = match database {
            Some(name) => config.with_database(name),
            None => config,
        };
        let settings = ConnectionSettings {
            uri: config.connection_uri(),
            redacted_uri: config.redacted_uri(),
            database: config.database.clone(),
        };

        tracing::info!(uri = %settings.redacted_uri, "Connection URI constructed");

        Self {
            builder,
            settings,
            schemas: SchemaRoot::new(config.schema_root),
            state: Mutex::new(ConnectionState::Disconnected),
            connect_gate: AsyncMutex::new(()),
        }
    }

    /// Creates a disconnected client configured from `MONGO_*` environment variables.
    pub fn from_env(builder: C, database: Option<&str>) -> DocumentStoreResult<Self> {
        Ok(Self::new(builder, StoreConfig::load()?, database))
    }

    /// The database every operation targets.
    pub fn database(&self) -> &str {
        &self.settings.database
    }

    pub fn schema_root(&self) -> &SchemaRoot {
        &self.schemas
    }

    /// Whether a verified connection is currently held.
    pub fn is_connected(&self) -> bool {
        matches!(*self.lock_state(), ConnectionState::Connected(_))
    }

    /// Opens and verifies the connection unless one is already held.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Connection`] if the connection cannot be
    /// opened or the ping fails. There is no internal retry.
    pub async fn connect(&self) -> DocumentStoreResult<()> {
        self.backend().await.map(|_| ())
    }

    /// Connects if needed and returns a guard that closes the connection when dropped.
    pub async fn session(&self) -> DocumentStoreResult<Session<'_, C>> {
        self.connect().await?;

        Ok(Session::new(self))
    }

    /// Borrows a view bound to one collection name.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, C> {
        Collection::new(name.to_string(), self)
    }

    /// Shuts down the held connection, if any, and returns to the disconnected state.
    pub async fn close(&self) -> DocumentStoreResult<()> {
        let previous = self.take_backend();

        if let Some(backend) = previous {
            backend
                .shutdown()
                .await
                .inspect_err(|e| tracing::warn!(error = %e, "Error while closing connection"))?;
            tracing::info!(database = %self.settings.database, "Connection closed");
        }

        Ok(())
    }

    /// Drops the held connection without waiting for a graceful shutdown.
    pub(crate) fn release(&self) {
        if self.take_backend().is_some() {
            tracing::info!(database = %self.settings.database, "Connection released");
        }
    }

    fn take_backend(&self) -> Option<Arc<C::Backend>> {
        match std::mem::replace(&mut *self.lock_state(), ConnectionState::Disconnected) {
            ConnectionState::Connected(backend) => Some(backend),
            ConnectionState::Disconnected => None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState<C::Backend>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn current_backend(&self) -> Option<Arc<C::Backend>> {
        match &*self.lock_state() {
            ConnectionState::Connected(backend) => Some(Arc::clone(backend)),
            ConnectionState::Disconnected => None,
        }
    }

    async fn backend(&self) -> DocumentStoreResult<Arc<C::Backend>> {
        if let Some(backend) = self.current_backend() {
            return Ok(backend);
        }

        let _gate = self.connect_gate.lock().await;

        // Another task may have connected while this one waited on the gate.
        if let Some(backend) = self.current_backend() {
            return Ok(backend);
        }

        tracing::info!(database = %self.settings.database, "Attempting to connect to document store");

        let backend = self.builder
            .build(&self.settings)
            .await
            .map_err(into_connection_error)
            .inspect_err(|e| tracing::error!(error = %e, "Failed to open connection"))?;

        if let Err(err) = backend.ping().await {
            let err = into_connection_error(err);
            tracing::error!(error = %err, "Liveness probe failed");

            if let Err(shutdown_err) = backend.shutdown().await {
                tracing::warn!(error = %shutdown_err, "Error while discarding unverified connection");
            }

            return Err(err);
        }

        let backend = Arc::new(backend);
        *self.lock_state() = ConnectionState::Connected(Arc::clone(&backend));

        tracing::info!(database = %self.settings.database, "Successfully connected to document store");

        Ok(backend)
    }

    /// Resolves the backend for one operation, naming it in any connection failure.
    async fn backend_for(&self, operation: &'static str, collection: &str) -> DocumentStoreResult<Arc<C::Backend>> {
        self.backend()
            .await
            .map_err(|e| e.with_context(operation, collection))
    }

    /// Creates `collection` if needed and installs the named schema as its strict validator.
    ///
    /// Safe to call repeatedly: an existing collection is not an error and the
    /// validator is simply replaced with the same schema.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::SchemaNotFound`] if no file called `schema_filename`
    ///   exists below the schema root
    /// - [`DocumentStoreError::StoreOperation`] if the store rejects the schema
    /// - [`DocumentStoreError::Unreachable`] if the store cannot be reached
    pub async fn ensure_validation(&self, collection: &str, schema_filename: &str) -> DocumentStoreResult<()> {
        let validator = self.schemas.load(schema_filename)?;
        let backend = self.backend_for("ensure_validation", collection).await?;

        match backend.create_collection(collection).await {
            Ok(()) => tracing::info!(collection, "Collection created"),
            Err(DocumentStoreError::CollectionAlreadyExists(_)) => {
                tracing::debug!(collection, "Collection already exists");
            },
            Err(err) => return Err(err.with_context("create_collection", collection)),
        }

        backend
            .modify_validator(collection, validator, ValidationLevel::Strict)
            .await
            .map_err(|e| e.with_context("ensure_validation", collection))
            .inspect_err(|e| tracing::error!(collection, error = %e, "Failed to apply validation schema"))?;

        tracing::info!(collection, schema = schema_filename, "Validation schema applied to collection");

        Ok(())
    }

    /// Creates an index over `keys`, e.g. `doc! { "user_id": 1, "log_date": 1 }`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to index
    /// * `keys` - Field names mapped to `1` (ascending) or `-1` (descending)
    /// * `unique` - Whether the store rejects documents repeating the key
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::StoreOperation`] if the index cannot be
    /// built, for instance because existing documents violate uniqueness.
    pub async fn create_index(&self, collection: &str, keys: Document, unique: bool) -> DocumentStoreResult<()> {
        tracing::info!(collection, keys = ?keys, unique, "Creating index");

        self.backend_for("create_index", collection)
            .await?
            .create_index(collection, keys, unique)
            .await
            .map_err(|e| e.with_context("create_index", collection))
    }

    /// Inserts a document stamped `is_deleted: false` and returns its identifier.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::ValidationRejected`] if the collection validator
    ///   rejects the document
    /// - [`DocumentStoreError::StoreOperation`] for any other store failure,
    ///   such as a duplicate key
    /// - [`DocumentStoreError::Unreachable`] if the store cannot be reached
    pub async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        tracing::info!(collection, "Inserting one document");

        let id = self.backend_for("insert_one", collection)
            .await?
            .insert_one(collection, mark_live(document))
            .await
            .map_err(|e| e.with_context("insert_one", collection))
            .inspect_err(|e| tracing::error!(collection, error = %e, "Insert failed"))?;

        tracing::info!(collection, id = %id, "Document inserted");

        Ok(id)
    }

    /// Serializes `record` and inserts it like [`insert_one`](Self::insert_one).
    pub async fn insert_one_as<T: Serialize + ?Sized>(&self, collection: &str, record: &T) -> DocumentStoreResult<Bson> {
        let document = to_document(record).map_err(|e| e.with_context("insert_one", collection))?;

        self.insert_one(collection, document).await
    }

    /// Inserts documents stamped `is_deleted: false`; identifiers come back in input order.
    ///
    /// An empty input inserts nothing and returns no identifiers.
    ///
    /// # Errors
    ///
    /// The insert is ordered: the first rejected document stops the batch and
    /// is reported as [`DocumentStoreError::ValidationRejected`] or
    /// [`DocumentStoreError::StoreOperation`]. Documents before it stay written.
    pub async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        tracing::info!(collection, count = documents.len(), "Inserting many documents");

        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let ids = self.backend_for("insert_many", collection)
            .await?
            .insert_many(
                collection,
                documents
                    .into_iter()
                    .map(mark_live)
                    .collect(),
            )
            .await
            .map_err(|e| e.with_context("insert_many", collection))
            .inspect_err(|e| tracing::error!(collection, error = %e, "Insert failed"))?;

        tracing::info!(collection, ids = ?ids, "Documents inserted");

        Ok(ids)
    }

    /// Finds at most one document. Soft-deleted documents are skipped unless
    /// `include_deleted` is set. `query` itself is never modified.
    ///
    /// # Errors
    ///
    /// A missing match is `Ok(None)`, not an error. A malformed query yields
    /// [`DocumentStoreError::StoreOperation`].
    pub async fn find_one(
        &self,
        collection: &str,
        query: &Document,
        include_deleted: bool,
    ) -> DocumentStoreResult<Option<Document>> {
        let filter = scoped_query(query, include_deleted);
        tracing::info!(collection, query = ?filter, "Finding one document");

        let found = self.backend_for("find_one", collection)
            .await?
            .find_one(collection, filter)
            .await
            .map_err(|e| e.with_context("find_one", collection))
            .inspect_err(|e| tracing::error!(collection, error = %e, "Find failed"))?;

        tracing::info!(collection, found = found.is_some(), "Find one result");

        Ok(found)
    }

    /// Like [`find_one`](Self::find_one), deserializing the match into `T`.
    pub async fn find_one_as<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: &Document,
        include_deleted: bool,
    ) -> DocumentStoreResult<Option<T>> {
        self.find_one(collection, query, include_deleted)
            .await?
            .map(from_document)
            .transpose()
            .map_err(|e| e.with_context("find_one", collection))
    }

    /// Finds every matching document, sorted, then skipped, then limited.
    ///
    /// Soft-deleted documents are skipped unless `include_deleted` is set.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to search
    /// * `query` - The filter, left unmodified
    /// * `include_deleted` - Whether soft-deleted documents are returned as well
    /// * `options` - Sort keys, skip and limit; zero skip and zero limit mean no
    ///   offset and no limit
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::StoreOperation`] if the query or sort
    /// specification is malformed.
    pub async fn find_many(
        &self,
        collection: &str,
        query: &Document,
        include_deleted: bool,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        let filter = scoped_query(query, include_deleted);
        tracing::info!(
            collection,
            query = ?filter,
            sort = ?options.sort_document(),
            limit = options.limit,
            skip = options.skip,
            "Finding many documents",
        );

        let documents = self.backend_for("find_many", collection)
            .await?
            .find(collection, filter, options)
            .await
            .map_err(|e| e.with_context("find_many", collection))
            .inspect_err(|e| tracing::error!(collection, error = %e, "Find failed"))?;

        tracing::info!(collection, count = documents.len(), "Find many result");

        Ok(documents)
    }

    /// Like [`find_many`](Self::find_many), deserializing every match into `T`.
    pub async fn find_many_as<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: &Document,
        include_deleted: bool,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<T>> {
        self.find_many(collection, query, include_deleted, options)
            .await?
            .into_iter()
            .map(from_document)
            .collect::<DocumentStoreResult<Vec<T>>>()
            .map_err(|e| e.with_context("find_many", collection))
    }

    /// Merges `fields` into the first document matching `query`.
    ///
    /// Only the named fields change. The query is used as given, so
    /// soft-deleted documents can be updated too.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::ValidationRejected`] if the merged document no
    ///   longer satisfies the collection validator
    /// - [`DocumentStoreError::StoreOperation`] for a malformed query or update
    pub async fn update_one(&self, collection: &str, query: &Document, fields: Document) -> DocumentStoreResult<UpdateOutcome> {
        tracing::info!(collection, query = ?query, "Updating one document");

        let outcome = self.backend_for("update_one", collection)
            .await?
            .update_one(collection, query.clone(), set_fields(fields))
            .await
            .map_err(|e| e.with_context("update_one", collection))
            .inspect_err(|e| tracing::error!(collection, error = %e, "Update failed"))?;

        tracing::info!(collection, modified = outcome.modified_count, "Update result");

        Ok(outcome)
    }

    /// Merges `fields` into every document matching `query`, deleted or not.
    ///
    /// # Errors
    ///
    /// Same as [`update_one`](Self::update_one).
    pub async fn update_many(&self, collection: &str, query: &Document, fields: Document) -> DocumentStoreResult<UpdateOutcome> {
        tracing::info!(collection, query = ?query, "Updating many documents");

        let outcome = self.backend_for("update_many", collection)
            .await?
            .update_many(collection, query.clone(), set_fields(fields))
            .await
            .map_err(|e| e.with_context("update_many", collection))
            .inspect_err(|e| tracing::error!(collection, error = %e, "Update failed"))?;

        tracing::info!(collection, modified = outcome.modified_count, "Update result");

        Ok(outcome)
    }

    /// Deletes the first document matching `query`.
    ///
    /// A soft delete sets `is_deleted: true` and reports the number of
    /// documents modified; a hard delete removes the document and reports the
    /// number removed.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::StoreOperation`] for a malformed query.
    /// A query matching nothing is a zero count.
    pub async fn delete_one(&self, collection: &str, query: &Document, soft_delete: bool) -> DocumentStoreResult<DeleteOutcome> {
        tracing::info!(collection, query = ?query, soft_delete, "Deleting one document");

        let backend = self.backend_for("delete_one", collection).await?;
        let outcome = if soft_delete {
            backend
                .update_one(collection, query.clone(), soft_delete_update())
                .await
                .map(|outcome| DeleteOutcome::soft(outcome.modified_count))
        } else {
            backend
                .delete_one(collection, query.clone())
                .await
                .map(DeleteOutcome::hard)
        }
        .map_err(|e| e.with_context("delete_one", collection))
        .inspect_err(|e| tracing::error!(collection, error = %e, "Delete failed"))?;

        tracing::info!(collection, count = outcome.count, soft = outcome.soft, "Delete result");

        Ok(outcome)
    }

    /// Batch form of [`delete_one`](Self::delete_one).
    pub async fn delete_many(&self, collection: &str, query: &Document, soft_delete: bool) -> DocumentStoreResult<DeleteOutcome> {
        tracing::info!(collection, query = ?query, soft_delete, "Deleting many documents");

        let backend = self.backend_for("delete_many", collection).await?;
        let outcome = if soft_delete {
            backend
                .update_many(collection, query.clone(), soft_delete_update())
                .await
                .map(|outcome| DeleteOutcome::soft(outcome.modified_count))
        } else {
            backend
                .delete_many(collection, query.clone())
                .await
                .map(DeleteOutcome::hard)
        }
        .map_err(|e| e.with_context("delete_many", collection))
        .inspect_err(|e| tracing::error!(collection, error = %e, "Delete failed"))?;

        tracing::info!(collection, count = outcome.count, soft = outcome.soft, "Delete result");

        Ok(outcome)
    }

    /// Runs `pipeline` and returns its output.
    ///
    /// Soft-deleted documents are NOT filtered out; add a `$match` on
    /// `is_deleted` to the pipeline when they should be.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::StoreOperation`] if a stage is unknown or
    /// malformed.
    pub async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        tracing::info!(collection, pipeline = ?pipeline, "Aggregating documents");

        let documents = self.backend_for("aggregate", collection)
            .await?
            .aggregate(collection, pipeline)
            .await
            .map_err(|e| e.with_context("aggregate", collection))
            .inspect_err(|e| tracing::error!(collection, error = %e, "Aggregate failed"))?;

        tracing::info!(collection, count = documents.len(), "Aggregate result");

        Ok(documents)
    }

    /// Counts documents matching `query`, soft-deleted ones included.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::StoreOperation`] for a malformed query.
    pub async fn count_documents(&self, collection: &str, query: &Document) -> DocumentStoreResult<u64> {
        tracing::info!(collection, query = ?query, "Counting documents");

        let count = self.backend_for("count_documents", collection)
            .await?
            .count_documents(collection, query.clone())
            .await
            .map_err(|e| e.with_context("count_documents", collection))
            .inspect_err(|e| tracing::error!(collection, error = %e, "Count failed"))?;

        tracing::info!(collection, count, "Count result");

        Ok(count)
    }
}

impl<C: StoreBackendBuilder> std::fmt::Debug for DocumentStoreClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStoreClient")
            .field("settings", &self.settings)
            .field("schemas", &self.schemas)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn into_connection_error(err: DocumentStoreError) -> DocumentStoreError {
    match err {
        DocumentStoreError::Connection(_) => err,
        other => DocumentStoreError::Connection(other.to_string()),
    }
}
