//! A soft-delete aware, schema-enforcing document store client.
//!
//! This crate is the core of the docstore project and provides:
//!
//! - **Client** ([`client`]) - [`DocumentStoreClient`](client::DocumentStoreClient), the policy-enforcing operation set
//! - **Scoped lifecycle** ([`session`]) - A guard that releases the connection when dropped
//! - **Collection views** ([`collection`]) - A collection name bound to a client
//! - **Store backend abstraction** ([`backend`]) - The driver seam backends implement
//! - **Query shaping** ([`query`]) - Sorting, pagination, and the soft-delete filter
//! - **Schema discovery** ([`schema`]) - Loading validator schemas from disk
//! - **Configuration** ([`config`]) - Figment-based connection settings
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docstore::{prelude::*, mongodb::MongoDbStore};
//! use bson::doc;
//!
//! let client = DocumentStoreClient::from_env(MongoDbStore::builder(), None)?;
//! let session = client.session().await?;
//!
//! session.ensure_validation("users", "users_schema.json").await?;
//! let id = session.insert_one("users", doc! { "name": "Ann" }).await?;
//! let ann = session.find_one("users", &doc! { "_id": id }, false).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_core;

pub mod backend;
pub mod client;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod outcome;
pub mod query;
pub mod schema;
pub mod session;
