//! Soft-delete aware, schema-enforcing document store client.
//!
//! This crate is the primary entry point of the docstore project. It re-exports
//! the client and its supporting types from `docstore-core` and gives access to
//! the available storage backends.
//!
//! # Features
//!
//! - **Soft delete** - Deletes flag documents by default and reads hide flagged ones
//! - **Schema enforcement** - File-resident `$jsonSchema` validators applied per collection
//! - **Lazy connections** - Connected on first use, verified with a ping, released by a scoped guard
//! - **Multiple backends** - In-memory for tests, MongoDB for production
//!
//! # Quick Start
//!
//! ```ignore
//! use docstore::{prelude::*, memory::InMemoryStore};
//! use docstore::bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let client = DocumentStoreClient::new(InMemoryStore::builder(), StoreConfig::default(), None);
//!     let session = client.session().await?;
//!
//!     session.ensure_validation("users", "users_schema.json").await?;
//!
//!     let id = session.insert_one("users", doc! { "name": "Ann", "age": 31 }).await?;
//!     session.delete_one("users", &doc! { "_id": id.clone() }, true).await?;
//!
//!     // Hidden from reads, still visible when asked for explicitly
//!     assert!(session.find_one("users", &doc! { "_id": id.clone() }, false).await?.is_none());
//!     assert!(session.find_one("users", &doc! { "_id": id }, true).await?.is_some());
//!
//!     session.close().await
//! }
//! ```
//!
//! # Configuration
//!
//! [`StoreConfig`](config::StoreConfig) reads `MONGO_DATABASE`, `MONGO_USER`,
//! `MONGO_PASSWORD`, `MONGO_HOST`, `MONGO_PORT` and `MONGO_SCHEMA_ROOT`, falling
//! back to `fitness_db` on `localhost:27017` with schemas under `./schema`.
//!
//! # Backends
//!
//! - [`memory`] - In-process store for development and testing
//! - `mongodb` - MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use docstore_core::{backend, client, collection, config, document, error, outcome, query, schema, session};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docstore_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docstore_mongodb::{MongoDbStore, MongoDbStoreBuilder, error::into_store_error};
}
