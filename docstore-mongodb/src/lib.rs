//! MongoDB backend for docstore.
//!
//! This crate implements the `StoreBackend` trait over the official async
//! MongoDB driver. Filters, updates, validators and pipelines are passed to the
//! server untouched; the client layer owns every policy.
//!
//! To use this backend through the facade crate, enable the `mongodb` feature:
//!
//! ```toml
//! [dependencies]
//! docstore = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Errors
//!
//! Driver errors are mapped onto the backend error contract:
//!
//! - server selection, DNS, authentication and I/O failures become
//!   `DocumentStoreError::Connection`
//! - server code 121 (document failed validation) becomes
//!   `DocumentStoreError::DocumentValidation`
//! - server code 48 (namespace exists) becomes
//!   `DocumentStoreError::CollectionAlreadyExists`
//! - anything else becomes `DocumentStoreError::Backend`
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use docstore::{client::DocumentStoreClient, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = MongoDbStore::builder().server_selection_timeout(Duration::from_secs(5));
//!     let client = DocumentStoreClient::from_env(builder, None)?;
//!
//!     client.connect().await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_mongodb;

pub mod error;
pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
