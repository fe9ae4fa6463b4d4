//! Convenient re-exports of commonly used types from docstore.
//!
//! ```ignore
//! use docstore::prelude::*;
//! ```

pub use docstore_core::{
    backend::{ConnectionSettings, StoreBackend, StoreBackendBuilder, ValidationLevel},
    client::DocumentStoreClient,
    collection::Collection,
    config::StoreConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    outcome::{DeleteOutcome, UpdateOutcome},
    query::{DELETED_FIELD, FindOptions, Sort, SortDirection},
    session::Session,
};
