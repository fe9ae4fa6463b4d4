//! In-memory store backend for docstore.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It speaks the same filter, update, validator and pipeline syntax as a real server, so
//! a [`DocumentStoreClient`](docstore_core::client::DocumentStoreClient) behaves the same
//! over either. It is meant for development and tests.
//!
//! # Features
//!
//! - **Shared state** - Every handle a builder opens sees the same collections
//! - **Native filters** - Comparison, membership and logical operators over dotted paths
//! - **Validators** - `$jsonSchema` validators with strict and moderate levels
//! - **Aggregation** - The common pipeline stages and group accumulators
//! - **Outage simulation** - Mark the store unavailable to exercise reconnects
//!
//! # Quick Start
//!
//! ```ignore
//! use docstore_core::{client::DocumentStoreClient, config::StoreConfig};
//! use docstore_memory::InMemoryStore;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DocumentStoreClient::new(InMemoryStore::builder(), StoreConfig::default(), None);
//!     let session = client.session().await?;
//!
//!     let id = session.insert_one("users", doc! { "name": "Alice" }).await?;
//!     let alice = session.find_one("users", &doc! { "_id": id }, false).await?;
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_memory;

mod evaluator;
mod pipeline;
mod schema;
mod update;

pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
