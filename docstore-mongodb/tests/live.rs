//! The ignored tests run against a live server configured through `MONGO_*`
//! variables: `cargo test -p docstore-mongodb -- --ignored`

use std::time::Duration;

use bson::doc;

use docstore_core::{client::DocumentStoreClient, error::DocumentStoreError};
use docstore_mongodb::MongoDbStore;

#[tokio::test]
#[ignore = "requires a running MongoDB server"]
async fn soft_delete_round_trip() {
    let builder = MongoDbStore::builder()
        .app_name("docstore-live-tests")
        .server_selection_timeout(Duration::from_secs(5));
    let client = DocumentStoreClient::from_env(builder, Some("docstore_live_tests")).unwrap();
    let session = client.session().await.unwrap();

    let id = session
        .insert_one("users", doc! { "name": "Ann", "age": 31 })
        .await
        .unwrap();
    let query = doc! { "_id": id };

    session.delete_one("users", &query, true).await.unwrap();
    assert!(session.find_one("users", &query, false).await.unwrap().is_none());
    assert!(session.find_one("users", &query, true).await.unwrap().is_some());

    session.delete_one("users", &query, false).await.unwrap();
    assert!(session.find_one("users", &query, true).await.unwrap().is_none());

    session.close().await.unwrap();
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    let builder = MongoDbStore::builder().server_selection_timeout(Duration::from_millis(200));
    let config = docstore_core::config::StoreConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        ..Default::default()
    };
    let client = DocumentStoreClient::new(builder, config, None);

    let result = client.connect().await;

    assert!(matches!(result, Err(DocumentStoreError::Connection(_))));
    assert!(!client.is_connected());
}
