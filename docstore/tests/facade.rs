use std::fs;

use docstore::{bson::doc, memory::InMemoryStore, prelude::*};

#[tokio::test]
async fn ann_lifecycle_through_the_prelude() {
    let schemas = tempfile::tempdir().unwrap();
    fs::write(
        schemas.path().join("users_schema.json"),
        r#"{ "$jsonSchema": { "required": ["name"], "properties": { "name": { "bsonType": "string" } } } }"#,
    )
    .unwrap();

    let config = StoreConfig {
        schema_root: schemas.path().to_path_buf(),
        ..StoreConfig::default()
    };
    let client = DocumentStoreClient::new(InMemoryStore::builder(), config, None);
    let session = client.session().await.unwrap();

    session.ensure_validation("users", "users_schema.json").await.unwrap();

    let id = session
        .insert_one("users", doc! { "name": "Ann", "age": 31 })
        .await
        .unwrap();
    let query = doc! { "_id": id.clone() };

    assert_eq!(
        session.find_one("users", &query, false).await.unwrap(),
        Some(doc! { "_id": id.clone(), "name": "Ann", "age": 31, DELETED_FIELD: false })
    );

    assert_eq!(session.delete_one("users", &query, true).await.unwrap(), DeleteOutcome::soft(1));
    assert_eq!(session.find_one("users", &query, false).await.unwrap(), None);
    assert_eq!(session.count_documents("users", &doc! { "name": "Ann" }).await.unwrap(), 1);

    assert_eq!(session.delete_one("users", &query, false).await.unwrap(), DeleteOutcome::hard(1));
    assert_eq!(session.find_one("users", &query, true).await.unwrap(), None);

    session.close().await.unwrap();
    assert!(!client.is_connected());
}
