//! A borrowed view of one collection.
//!
//! [`Collection`] binds a collection name to a client so call sites don't have
//! to repeat it. It holds no state of its own: every call resolves the backend
//! through the client, connecting if needed, exactly like calling the client
//! directly.
//!
//! # Example
//!
//! ```ignore
//! let logs = client.collection("daily_workout_logs");
//!
//! logs.insert_one(doc! { "workout_content": "Cycling" }).await?;
//! let live = logs.count_documents(&doc! { "is_deleted": false }).await?;
//! ```

use bson::{Bson, Document};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    backend::StoreBackendBuilder,
    client::DocumentStoreClient,
    error::DocumentStoreResult,
    outcome::{DeleteOutcome, UpdateOutcome},
    query::FindOptions,
};

/// A collection name bound to a client.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the client reference
/// * `C` - The client's backend builder
#[derive(Debug)]
pub struct Collection<'a, C: StoreBackendBuilder> {
    name: String,
    client: &'a DocumentStoreClient<C>,
}

impl<'a, C: StoreBackendBuilder> Collection<'a, C> {
    pub(crate) fn new(name: String, client: &'a DocumentStoreClient<C>) -> Self {
        Self { name, client }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// See [`DocumentStoreClient::ensure_validation`].
    pub async fn ensure_validation(&self, schema_filename: &str) -> DocumentStoreResult<()> {
        self.client
            .ensure_validation(&self.name, schema_filename)
            .await
    }

    pub async fn create_index(&self, keys: Document, unique: bool) -> DocumentStoreResult<()> {
        self.client
            .create_index(&self.name, keys, unique)
            .await
    }

    pub async fn insert_one(&self, document: Document) -> DocumentStoreResult<Bson> {
        self.client
            .insert_one(&self.name, document)
            .await
    }

    pub async fn insert_one_as<T: Serialize + ?Sized>(&self, record: &T) -> DocumentStoreResult<Bson> {
        self.client
            .insert_one_as(&self.name, record)
            .await
    }

    pub async fn insert_many(&self, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        self.client
            .insert_many(&self.name, documents)
            .await
    }

    pub async fn find_one(&self, query: &Document, include_deleted: bool) -> DocumentStoreResult<Option<Document>> {
        self.client
            .find_one(&self.name, query, include_deleted)
            .await
    }

    pub async fn find_one_as<T: DeserializeOwned>(&self, query: &Document, include_deleted: bool) -> DocumentStoreResult<Option<T>> {
        self.client
            .find_one_as(&self.name, query, include_deleted)
            .await
    }

    pub async fn find_many(
        &self,
        query: &Document,
        include_deleted: bool,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.client
            .find_many(&self.name, query, include_deleted, options)
            .await
    }

    pub async fn find_many_as<T: DeserializeOwned>(
        &self,
        query: &Document,
        include_deleted: bool,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<T>> {
        self.client
            .find_many_as(&self.name, query, include_deleted, options)
            .await
    }

    pub async fn update_one(&self, query: &Document, fields: Document) -> DocumentStoreResult<UpdateOutcome> {
        self.client
            .update_one(&self.name, query, fields)
            .await
    }

    pub async fn update_many(&self, query: &Document, fields: Document) -> DocumentStoreResult<UpdateOutcome> {
        self.client
            .update_many(&self.name, query, fields)
            .await
    }

    pub async fn delete_one(&self, query: &Document, soft_delete: bool) -> DocumentStoreResult<DeleteOutcome> {
        self.client
            .delete_one(&self.name, query, soft_delete)
            .await
    }

    pub async fn delete_many(&self, query: &Document, soft_delete: bool) -> DocumentStoreResult<DeleteOutcome> {
        self.client
            .delete_many(&self.name, query, soft_delete)
            .await
    }

    pub async fn aggregate(&self, pipeline: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        self.client
            .aggregate(&self.name, pipeline)
            .await
    }

    pub async fn count_documents(&self, query: &Document) -> DocumentStoreResult<u64> {
        self.client
            .count_documents(&self.name, query)
            .await
    }
}
