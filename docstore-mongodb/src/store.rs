use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection, Database, IndexModel,
    options::{ClientOptions, FindOptions as MongoFindOptions, IndexOptions},
};

use docstore_core::{
    backend::{ConnectionSettings, StoreBackend, StoreBackendBuilder, ValidationLevel},
    error::{DocumentStoreError, DocumentStoreResult},
    outcome::UpdateOutcome,
    query::FindOptions,
};

use crate::error::into_store_error;

/// Builds the `collMod` command installing `validator` on `collection`.
pub fn validator_command(collection: &str, validator: Document, level: ValidationLevel) -> Document {
    doc! {
        "collMod": collection,
        "validator": validator,
        "validationLevel": level.as_str(),
    }
}

/// Converts pagination options to the driver's find options.
///
/// Zero skip and zero limit are left unset, which the server reads as no
/// offset and no limit.
pub fn find_options(options: &FindOptions) -> MongoFindOptions {
    let mut find = MongoFindOptions::default();

    find.sort = options.sort_document();
    if options.skip > 0 {
        find.skip = Some(options.skip);
    }
    if options.limit > 0 {
        find.limit = Some(i64::try_from(options.limit).unwrap_or(i64::MAX));
    }

    find
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: Database,
}

impl MongoDbStore {
    pub fn new(client: Client, database: &str) -> Self {
        let database = client.database(database);

        Self { client, database }
    }

    pub fn builder() -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::default()
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.database.collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn ping(&self) -> DocumentStoreResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(into_store_error)?;

        Ok(())
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.database
            .create_collection(name)
            .await
            .map_err(into_store_error)
    }

    async fn modify_validator(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
    ) -> DocumentStoreResult<()> {
        self.database
            .run_command(validator_command(collection, validator, level))
            .await
            .map_err(into_store_error)?;

        Ok(())
    }

    async fn create_index(&self, collection: &str, keys: Document, unique: bool) -> DocumentStoreResult<()> {
        let result = self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(keys)
                    .options(
                        IndexOptions::builder()
                            .unique(unique)
                            .build()
                    )
                    .build()
            )
            .await
            .map_err(into_store_error)?;

        tracing::debug!(collection, index = %result.index_name, "Index ready");

        Ok(())
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        Ok(
            self.get_collection(collection)
                .insert_one(document)
                .await
                .map_err(into_store_error)?
                .inserted_id
        )
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        let expected = documents.len();
        let mut inserted = self.get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(into_store_error)?
            .inserted_ids
            .into_iter()
            .collect::<Vec<_>>();

        // The driver reports ids keyed by input position.
        inserted.sort_by_key(|(index, _)| *index);

        if inserted.len() != expected {
            return Err(DocumentStoreError::Backend(format!(
                "expected {expected} inserted ids, driver reported {}",
                inserted.len()
            )));
        }

        Ok(inserted.into_iter().map(|(_, id)| id).collect())
    }

    async fn find_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one(filter)
            .await
            .map_err(into_store_error)
    }

    async fn find(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .find(filter)
            .with_options(find_options(&options))
            .await
            .map_err(into_store_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(into_store_error)
    }

    async fn update_one(&self, collection: &str, filter: Document, update: Document) -> DocumentStoreResult<UpdateOutcome> {
        let result = self.get_collection(collection)
            .update_one(filter, update)
            .await
            .map_err(into_store_error)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(&self, collection: &str, filter: Document, update: Document) -> DocumentStoreResult<UpdateOutcome> {
        let result = self.get_collection(collection)
            .update_many(filter, update)
            .await
            .map_err(into_store_error)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        Ok(
            self.get_collection(collection)
                .delete_one(filter)
                .await
                .map_err(into_store_error)?
                .deleted_count
        )
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        Ok(
            self.get_collection(collection)
                .delete_many(filter)
                .await
                .map_err(into_store_error)?
                .deleted_count
        )
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(into_store_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(into_store_error)
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .count_documents(filter)
            .await
            .map_err(into_store_error)
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client
            .clone()
            .shutdown()
            .await;

        Ok(())
    }
}

/// Opens [`MongoDbStore`] connections from connection settings.
///
/// The URI and database come from the client's configuration; the builder
/// only carries driver tuning.
#[derive(Debug, Clone, Default)]
pub struct MongoDbStoreBuilder {
    app_name: Option<String>,
    server_selection_timeout: Option<Duration>,
}

impl MongoDbStoreBuilder {
    /// Application name reported to the server in the connection handshake.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// How long an operation waits for a reachable server before failing.
    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(&self, settings: &ConnectionSettings) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&settings.uri)
            .await
            .map_err(|e| DocumentStoreError::Connection(format!("invalid connection uri {}: {e}", settings.redacted_uri)))?;

        if let Some(app_name) = &self.app_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(timeout) = self.server_selection_timeout {
            options.server_selection_timeout = Some(timeout);
        }

        let client = Client::with_options(options)
            .map_err(|e| DocumentStoreError::Connection(e.to_string()))?;

        Ok(MongoDbStore::new(client, &settings.database))
    }
}
