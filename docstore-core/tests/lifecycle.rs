use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};

use docstore_core::{
    backend::{ConnectionSettings, StoreBackend, StoreBackendBuilder, ValidationLevel},
    client::DocumentStoreClient,
    config::StoreConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    outcome::UpdateOutcome,
    query::FindOptions,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    CreateCollection(String),
    ModifyValidator(String, Document, ValidationLevel),
    InsertOne(Document),
    Find(Document, FindOptions),
    FindOne(Document),
    UpdateOne(Document, Document),
    UpdateMany(Document, Document),
    DeleteOne(Document),
    Aggregate(Vec<Document>),
    Count(Document),
}

#[derive(Debug, Default)]
struct Probe {
    builds: AtomicUsize,
    shutdowns: AtomicUsize,
    fail_ping: AtomicBool,
    calls: Mutex<Vec<Call>>,
    collections: Mutex<HashSet<String>>,
}

impl Probe {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct RecordingBackend {
    probe: Arc<Probe>,
}

#[async_trait]
impl StoreBackend for RecordingBackend {
    async fn ping(&self) -> DocumentStoreResult<()> {
        if self.probe.fail_ping.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::Backend("server selection timeout".into()));
        }
        Ok(())
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.probe.record(Call::CreateCollection(name.to_string()));
        if !self.probe.collections.lock().unwrap().insert(name.to_string()) {
            return Err(DocumentStoreError::CollectionAlreadyExists(name.to_string()));
        }
        Ok(())
    }

    async fn modify_validator(&self, collection: &str, validator: Document, level: ValidationLevel) -> DocumentStoreResult<()> {
        self.probe.record(Call::ModifyValidator(collection.to_string(), validator, level));
        Ok(())
    }

    async fn create_index(&self, _collection: &str, _keys: Document, _unique: bool) -> DocumentStoreResult<()> {
        Ok(())
    }

    async fn insert_one(&self, _collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        if document.contains_key("reject") {
            return Err(DocumentStoreError::DocumentValidation("Document failed validation".into()));
        }
        self.probe.record(Call::InsertOne(document));
        Ok(Bson::ObjectId(ObjectId::new()))
    }

    async fn insert_many(&self, _collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        Ok(documents.iter().map(|_| Bson::ObjectId(ObjectId::new())).collect())
    }

    async fn find_one(&self, _collection: &str, filter: Document) -> DocumentStoreResult<Option<Document>> {
        self.probe.record(Call::FindOne(filter));
        Ok(None)
    }

    async fn find(&self, _collection: &str, filter: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        self.probe.record(Call::Find(filter, options));
        Ok(vec![])
    }

    async fn update_one(&self, _collection: &str, filter: Document, update: Document) -> DocumentStoreResult<UpdateOutcome> {
        self.probe.record(Call::UpdateOne(filter, update));
        Ok(UpdateOutcome { matched_count: 1, modified_count: 1, upserted_id: None })
    }

    async fn update_many(&self, _collection: &str, filter: Document, update: Document) -> DocumentStoreResult<UpdateOutcome> {
        self.probe.record(Call::UpdateMany(filter, update));
        Ok(UpdateOutcome { matched_count: 2, modified_count: 2, upserted_id: None })
    }

    async fn delete_one(&self, _collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.probe.record(Call::DeleteOne(filter));
        Ok(1)
    }

    async fn delete_many(&self, _collection: &str, _filter: Document) -> DocumentStoreResult<u64> {
        Ok(0)
    }

    async fn aggregate(&self, _collection: &str, pipeline: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        self.probe.record(Call::Aggregate(pipeline));
        Ok(vec![])
    }

    async fn count_documents(&self, _collection: &str, filter: Document) -> DocumentStoreResult<u64> {
        self.probe.record(Call::Count(filter));
        Ok(0)
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct RecordingBuilder {
    probe: Arc<Probe>,
}

#[async_trait]
impl StoreBackendBuilder for RecordingBuilder {
    type Backend = RecordingBackend;

    async fn build(&self, settings: &ConnectionSettings) -> DocumentStoreResult<Self::Backend> {
        assert_eq!(settings.database, "fitness_db");
        // Give concurrent connect attempts a chance to interleave.
        tokio::task::yield_now().await;
        self.probe.builds.fetch_add(1, Ordering::SeqCst);

        Ok(RecordingBackend { probe: Arc::clone(&self.probe) })
    }
}

fn client() -> (DocumentStoreClient<RecordingBuilder>, Arc<Probe>) {
    client_with(StoreConfig::default())
}

fn client_with(config: StoreConfig) -> (DocumentStoreClient<RecordingBuilder>, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let client = DocumentStoreClient::new(RecordingBuilder { probe: Arc::clone(&probe) }, config, None);

    (client, probe)
}

#[tokio::test]
async fn connect_is_lazy_and_idempotent() {
    let (client, probe) = client();

    assert!(!client.is_connected());
    assert_eq!(probe.builds(), 0);

    client.connect().await.unwrap();
    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(probe.builds(), 1);
}

#[tokio::test]
async fn failed_ping_leaves_client_disconnected() {
    let (client, probe) = client();
    probe.fail_ping.store(true, Ordering::SeqCst);

    let err = client.connect().await.unwrap_err();

    assert!(err.is_connection(), "unexpected error: {err:?}");
    assert!(!client.is_connected());
    assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);

    probe.fail_ping.store(false, Ordering::SeqCst);
    client.connect().await.unwrap();

    assert_eq!(probe.builds(), 2);
}

#[tokio::test]
async fn concurrent_connects_open_one_backend() {
    let (client, probe) = client();

    let (a, b, c) = tokio::join!(client.connect(), client.connect(), client.connect());

    a.unwrap();
    b.unwrap();
    c.unwrap();
    assert_eq!(probe.builds(), 1);
}

#[tokio::test]
async fn operations_after_close_reconnect() {
    let (client, probe) = client();

    client.count_documents("users", &doc! {}).await.unwrap();
    client.close().await.unwrap();
    client.close().await.unwrap();

    assert!(!client.is_connected());
    assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);

    client.count_documents("users", &doc! {}).await.unwrap();

    assert!(client.is_connected());
    assert_eq!(probe.builds(), 2);
}

#[tokio::test]
async fn dropping_session_releases_connection() {
    let (client, _probe) = client();

    {
        let session = client.session().await.unwrap();
        session.count_documents("users", &doc! {}).await.unwrap();
        assert!(session.is_connected());
    }

    assert!(!client.is_connected());
}

#[tokio::test]
async fn session_is_released_on_error_path() {
    async fn failing_insert(client: &DocumentStoreClient<RecordingBuilder>) -> DocumentStoreResult<Bson> {
        let session = client.session().await?;
        session.insert_one("users", doc! { "reject": true }).await
    }

    let (client, _probe) = client();

    let err = failing_insert(&client).await.unwrap_err();

    assert!(matches!(err, DocumentStoreError::ValidationRejected { operation: "insert_one", .. }));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn explicit_session_close_shuts_backend_down() {
    let (client, probe) = client();

    let session = client.session().await.unwrap();
    session.close().await.unwrap();

    assert!(!client.is_connected());
    assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn insert_overwrites_caller_deleted_flag() {
    let (client, probe) = client();

    client.insert_one("users", doc! { "name": "Ann", "is_deleted": true }).await.unwrap();

    assert_eq!(probe.calls(), vec![Call::InsertOne(doc! { "name": "Ann", "is_deleted": false })]);
}

#[tokio::test]
async fn reads_inject_filter_into_a_copy() {
    let (client, probe) = client();
    let query = doc! { "name": "Ann" };

    client.find_one("users", &query, false).await.unwrap();
    client.find_one("users", &query, true).await.unwrap();
    client.find_many("users", &query, false, FindOptions::new().limit(4)).await.unwrap();

    assert_eq!(query, doc! { "name": "Ann" });
    assert_eq!(
        probe.calls(),
        vec![
            Call::FindOne(doc! { "name": "Ann", "is_deleted": false }),
            Call::FindOne(doc! { "name": "Ann" }),
            Call::Find(doc! { "name": "Ann", "is_deleted": false }, FindOptions::new().limit(4)),
        ],
    );
}

#[tokio::test]
async fn update_aggregate_and_count_bypass_the_filter() {
    let (client, probe) = client();
    let query = doc! { "name": "Ann" };

    client.update_one("users", &query, doc! { "age": 31 }).await.unwrap();
    client.count_documents("users", &query).await.unwrap();
    client.aggregate("users", vec![doc! { "$match": { "name": "Ann" } }]).await.unwrap();

    assert_eq!(
        probe.calls(),
        vec![
            Call::UpdateOne(doc! { "name": "Ann" }, doc! { "$set": { "age": 31 } }),
            Call::Count(doc! { "name": "Ann" }),
            Call::Aggregate(vec![doc! { "$match": { "name": "Ann" } }]),
        ],
    );
}

#[tokio::test]
async fn soft_delete_flags_and_hard_delete_removes() {
    let (client, probe) = client();
    let query = doc! { "name": "Ann" };

    let soft = client.delete_one("users", &query, true).await.unwrap();
    let hard = client.delete_one("users", &query, false).await.unwrap();
    let many = client.delete_many("users", &query, true).await.unwrap();

    assert!(soft.soft && soft.count == 1);
    assert!(!hard.soft && hard.count == 1);
    assert_eq!(many.count, 2);
    assert_eq!(
        probe.calls(),
        vec![
            Call::UpdateOne(doc! { "name": "Ann" }, doc! { "$set": { "is_deleted": true } }),
            Call::DeleteOne(doc! { "name": "Ann" }),
            Call::UpdateMany(doc! { "name": "Ann" }, doc! { "$set": { "is_deleted": true } }),
        ],
    );
}

#[tokio::test]
async fn ensure_validation_tolerates_existing_collection() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("user")).unwrap();
    std::fs::write(
        dir.path().join("user/users_schema.json"),
        r#"{"$jsonSchema": {"bsonType": "object", "required": ["name"]}}"#,
    )
    .unwrap();

    let (client, probe) = client_with(StoreConfig {
        schema_root: dir.path().to_path_buf(),
        ..StoreConfig::default()
    });

    client.ensure_validation("users", "users_schema.json").await.unwrap();
    client.ensure_validation("users", "users_schema.json").await.unwrap();

    let validator = doc! { "$jsonSchema": { "bsonType": "object", "required": ["name"] } };
    let validator_calls = probe
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::ModifyValidator(..)))
        .collect::<Vec<_>>();

    assert_eq!(
        validator_calls,
        vec![
            Call::ModifyValidator("users".into(), validator.clone(), ValidationLevel::Strict),
            Call::ModifyValidator("users".into(), validator, ValidationLevel::Strict),
        ],
    );
}

#[tokio::test]
async fn missing_schema_fails_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let (client, probe) = client_with(StoreConfig {
        schema_root: dir.path().to_path_buf(),
        ..StoreConfig::default()
    });

    let err = client.ensure_validation("users", "users_schema.json").await.unwrap_err();

    assert!(matches!(err, DocumentStoreError::SchemaNotFound { .. }));
    assert_eq!(probe.builds(), 0);
}
