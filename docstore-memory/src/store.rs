//! In-memory storage implementation of the store backend.
//!
//! Collections live in a shared map behind an async-aware read-write lock.
//! Documents keep insertion order, which is also the natural order of
//! unsorted reads. Filters, updates, validators and pipelines use the same
//! native syntax the client passes to a real server.

use std::{
    collections::HashMap,
    iter,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;

use docstore_core::{
    backend::{ConnectionSettings, StoreBackend, StoreBackendBuilder, ValidationLevel},
    error::{DocumentStoreError, DocumentStoreResult},
    outcome::UpdateOutcome,
    query::FindOptions,
};

use crate::{
    evaluator::{DocumentEvaluator, first_value, values_equal},
    pipeline::{execute, sort_documents},
    schema,
    update::apply_update,
};

const DEFAULT_DATABASE: &str = "test";

#[derive(Debug, Clone)]
struct Validator {
    filter: Document,
    level: ValidationLevel,
}

#[derive(Debug, Clone)]
struct Index {
    keys: Document,
    unique: bool,
}

impl Index {
    fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Whether two documents collide on this index.
    fn collides(&self, left: &Document, right: &Document) -> bool {
        self.unique
            && self
                .fields()
                .all(|field| values_equal(&first_value(left, field), &first_value(right, field)))
    }
}

#[derive(Debug, Default)]
struct CollectionData {
    documents: Vec<Document>,
    validator: Option<Validator>,
    indexes: Vec<Index>,
}

impl CollectionData {
    fn matching(&self, filter: &Document) -> DocumentStoreResult<Vec<usize>> {
        let mut positions = vec![];

        for (position, document) in self.documents.iter().enumerate() {
            if DocumentEvaluator::new(document).matches(filter)? {
                positions.push(position);
            }
        }

        Ok(positions)
    }

    fn passes_validator(&self, document: &Document) -> DocumentStoreResult<bool> {
        match &self.validator {
            Some(validator) => DocumentEvaluator::new(document).matches(&validator.filter),
            None => Ok(true),
        }
    }

    fn validate_insert(&self, document: &Document) -> DocumentStoreResult<()> {
        let enforced = self
            .validator
            .as_ref()
            .is_some_and(|validator| validator.level != ValidationLevel::Off);

        if enforced && !self.passes_validator(document)? {
            return Err(DocumentStoreError::DocumentValidation("Document failed validation".to_string()));
        }

        Ok(())
    }

    /// Moderate validation skips updates to documents that were already invalid.
    fn validate_update(&self, before: &Document, after: &Document) -> DocumentStoreResult<()> {
        let enforced = match self.validator.as_ref().map(|validator| validator.level) {
            None | Some(ValidationLevel::Off) => false,
            Some(ValidationLevel::Strict) => true,
            Some(ValidationLevel::Moderate) => self.passes_validator(before)?,
        };

        if enforced && !self.passes_validator(after)? {
            return Err(DocumentStoreError::DocumentValidation("Document failed validation".to_string()));
        }

        Ok(())
    }

    /// Rejects `candidate` if it collides with any document other than the one at `skip`.
    fn check_unique(&self, namespace: &str, candidate: &Document, skip: Option<usize>) -> DocumentStoreResult<()> {
        let others = self
            .documents
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != skip)
            .map(|(_, document)| document);

        for existing in others {
            if let (Some(id), Some(other)) = (candidate.get("_id"), existing.get("_id")) {
                if values_equal(id, other) {
                    return Err(duplicate_key(namespace, "_id_", id));
                }
            }

            if let Some(index) = self.indexes.iter().find(|index| index.collides(candidate, existing)) {
                let key = Bson::Document(Document::from_iter(
                    index
                        .fields()
                        .map(|field| (field.to_string(), first_value(candidate, field))),
                ));
                return Err(duplicate_key(namespace, &index_name(&index.keys), &key));
            }
        }

        Ok(())
    }
}

fn duplicate_key(namespace: &str, index: &str, key: &Bson) -> DocumentStoreError {
    DocumentStoreError::Backend(format!(
        "E11000 duplicate key error collection: {namespace} index: {index} dup key: {key}"
    ))
}

/// The server's default index name, e.g. `user_id_1_log_date_-1`.
fn index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{field}_{direction}"))
        .collect::<Vec<_>>()
        .join("_")
}

/// Generates an `_id` if the document has none, keeping `_id` as the first field.
fn with_id(document: Document) -> (Bson, Document) {
    if let Some(id) = document.get("_id").cloned() {
        return (id, document);
    }

    let id = Bson::ObjectId(ObjectId::new());
    let document = Document::from_iter(iter::once(("_id".to_string(), id.clone())).chain(document));

    (id, document)
}

type CollectionMap = HashMap<String, CollectionData>;

/// Thread-safe in-memory document store.
///
/// `InMemoryStore` is cloneable and uses `Arc`-wrapped state, so clones share
/// the same collections. Each handle is scoped to one database; handles for
/// different databases over the same store see disjoint collections.
///
/// The store can be marked unavailable with [`set_available`](Self::set_available),
/// after which every operation (including `ping`) fails with a connection
/// error, the way an unreachable server would.
///
/// # Example
///
/// ```ignore
/// use docstore_memory::InMemoryStore;
/// use docstore_core::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let id = store.insert_one("users", doc! { "name": "Alice" }).await?;
/// let alice = store.find_one("users", doc! { "_id": id }).await?;
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    collections: Arc<RwLock<CollectionMap>>,
    available: Arc<AtomicBool>,
    database: String,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store scoped to the `test` database.
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(CollectionMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            database: DEFAULT_DATABASE.to_string(),
        }
    }

    /// Creates a builder owning a fresh store.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Returns a handle over the same data scoped to another database.
    pub fn with_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Simulates the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(AtomicOrdering::SeqCst)
    }

    fn namespace(&self, collection: &str) -> String {
        format!("{}.{}", self.database, collection)
    }

    fn ensure_available(&self) -> DocumentStoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(DocumentStoreError::Connection(format!(
                "server selection timed out: in-memory store for database {} is unavailable",
                self.database
            )))
        }
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        self.ensure_available()?;

        let namespace = self.namespace(collection);
        let mut collections = self.collections.write().await;
        let data = collections.entry(namespace.clone()).or_default();

        // Ordered insert: documents before a failing one stay inserted.
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            let (id, document) = with_id(document);

            data.validate_insert(&document)?;
            data.check_unique(&namespace, &document, None)?;

            data.documents.push(document);
            ids.push(id);
        }

        tracing::debug!(namespace = %namespace, inserted = ids.len(), "Inserted documents");

        Ok(ids)
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        multi: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.ensure_available()?;

        let namespace = self.namespace(collection);
        let mut collections = self.collections.write().await;
        let Some(data) = collections.get_mut(&namespace) else {
            return Ok(UpdateOutcome::default());
        };

        let mut positions = data.matching(&filter)?;
        if !multi {
            positions.truncate(1);
        }

        let mut outcome = UpdateOutcome {
            matched_count: positions.len() as u64,
            ..UpdateOutcome::default()
        };

        for position in positions {
            let before = &data.documents[position];
            let mut after = before.clone();

            if !apply_update(&mut after, &update)? {
                continue;
            }

            data.validate_update(before, &after)?;
            data.check_unique(&namespace, &after, Some(position))?;

            data.documents[position] = after;
            outcome.modified_count += 1;
        }

        Ok(outcome)
    }

    async fn delete(&self, collection: &str, filter: Document, multi: bool) -> DocumentStoreResult<u64> {
        self.ensure_available()?;

        let namespace = self.namespace(collection);
        let mut collections = self.collections.write().await;
        let Some(data) = collections.get_mut(&namespace) else {
            return Ok(0);
        };

        let mut positions = data.matching(&filter)?;
        if !multi {
            positions.truncate(1);
        }

        // Remove from the back so earlier positions stay valid.
        for position in positions.iter().rev() {
            data.documents.remove(*position);
        }

        Ok(positions.len() as u64)
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn ping(&self) -> DocumentStoreResult<()> {
        self.ensure_available()
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.ensure_available()?;

        let namespace = self.namespace(name);
        let mut collections = self.collections.write().await;

        if collections.contains_key(&namespace) {
            return Err(DocumentStoreError::CollectionAlreadyExists(name.to_string()));
        }

        collections.insert(namespace, CollectionData::default());

        Ok(())
    }

    async fn modify_validator(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
    ) -> DocumentStoreResult<()> {
        self.ensure_available()?;

        if let Ok(json_schema) = validator.get_document("$jsonSchema") {
            schema::check(json_schema)?;
        }
        // Surfaces unknown operators now rather than on the first write.
        DocumentEvaluator::new(&Document::new()).matches(&validator)?;

        let namespace = self.namespace(collection);
        let mut collections = self.collections.write().await;
        let data = collections
            .get_mut(&namespace)
            .ok_or_else(|| DocumentStoreError::Backend(format!("ns does not exist: {namespace}")))?;

        data.validator = Some(Validator { filter: validator, level });

        tracing::debug!(namespace = %namespace, level = level.as_str(), "Installed collection validator");

        Ok(())
    }

    async fn create_index(&self, collection: &str, keys: Document, unique: bool) -> DocumentStoreResult<()> {
        self.ensure_available()?;

        if keys.is_empty() {
            return Err(DocumentStoreError::Backend("Index keys cannot be empty".to_string()));
        }

        let namespace = self.namespace(collection);
        let mut collections = self.collections.write().await;
        let data = collections.entry(namespace.clone()).or_default();

        if let Some(existing) = data.indexes.iter().find(|index| index.keys == keys) {
            if existing.unique == unique {
                return Ok(());
            }

            return Err(DocumentStoreError::Backend(format!(
                "Index already exists with different options: {}",
                index_name(&keys)
            )));
        }

        let index = Index { keys, unique };

        for (position, document) in data.documents.iter().enumerate() {
            if data.documents[position + 1..]
                .iter()
                .any(|other| index.collides(document, other))
            {
                let key = Bson::Document(Document::from_iter(
                    index
                        .fields()
                        .map(|field| (field.to_string(), first_value(document, field))),
                ));
                return Err(duplicate_key(&namespace, &index_name(&index.keys), &key));
            }
        }

        tracing::debug!(namespace = %namespace, index = %index_name(&index.keys), unique, "Created index");

        data.indexes.push(index);

        Ok(())
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        let mut ids = self.insert(collection, vec![document]).await?;

        ids.pop()
            .ok_or_else(|| DocumentStoreError::Backend("insert returned no identifier".to_string()))
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        if documents.is_empty() {
            return Err(DocumentStoreError::Backend("Invalid BatchCommand: no documents to insert".to_string()));
        }

        self.insert(collection, documents).await
    }

    async fn find_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<Option<Document>> {
        self.ensure_available()?;

        let collections = self.collections.read().await;
        let Some(data) = collections.get(&self.namespace(collection)) else {
            return Ok(None);
        };

        for document in &data.documents {
            if DocumentEvaluator::new(document).matches(&filter)? {
                return Ok(Some(document.clone()));
            }
        }

        Ok(None)
    }

    async fn find(&self, collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        self.ensure_available()?;

        let collections = self.collections.read().await;
        let Some(data) = collections.get(&self.namespace(collection)) else {
            return Ok(vec![]);
        };

        let mut documents = data
            .matching(&filter)?
            .into_iter()
            .map(|position| data.documents[position].clone())
            .collect::<Vec<_>>();

        if let Some(sort) = options.sort_document() {
            sort_documents(&mut documents, &sort)?;
        }

        let limit = match options.limit {
            0 => usize::MAX,
            limit => limit as usize,
        };

        Ok(documents
            .into_iter()
            .skip(options.skip as usize)
            .take(limit)
            .collect())
    }

    async fn update_one(&self, collection: &str, filter: Document, update: Document) -> DocumentStoreResult<UpdateOutcome> {
        self.update(collection, filter, update, false).await
    }

    async fn update_many(&self, collection: &str, filter: Document, update: Document) -> DocumentStoreResult<UpdateOutcome> {
        self.update(collection, filter, update, true).await
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.delete(collection, filter, false).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.delete(collection, filter, true).await
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        self.ensure_available()?;

        let documents = self
            .collections
            .read()
            .await
            .get(&self.namespace(collection))
            .map(|data| data.documents.clone())
            .unwrap_or_default();

        execute(documents, &pipeline)
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.ensure_available()?;

        let collections = self.collections.read().await;

        match collections.get(&self.namespace(collection)) {
            Some(data) => Ok(data.matching(&filter)?.len() as u64),
            None => Ok(0),
        }
    }
}

/// Opens handles onto one shared [`InMemoryStore`].
///
/// Every build returns a handle over the same data, scoped to the database in
/// the connection settings, so documents survive a client closing and
/// reconnecting.
///
/// # Example
///
/// ```ignore
/// use docstore_memory::InMemoryStore;
///
/// let builder = InMemoryStore::builder();
/// let store = builder.store();
/// let client = DocumentStoreClient::new(builder, StoreConfig::default(), None);
///
/// store.set_available(false);
/// assert!(client.connect().await.is_err());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder {
    store: InMemoryStore,
}

impl InMemoryStoreBuilder {
    /// Builds handles over an existing store.
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }

    /// A handle onto the shared store, for seeding or inspection.
    pub fn store(&self) -> InMemoryStore {
        self.store.clone()
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(&self, settings: &ConnectionSettings) -> DocumentStoreResult<Self::Backend> {
        tracing::debug!(database = %settings.database, "Opening in-memory store handle");

        Ok(self.store.with_database(&settings.database))
    }
}
