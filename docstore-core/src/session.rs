//! Scoped connection ownership.
//!
//! A [`Session`] is returned by [`DocumentStoreClient::session`] once the
//! client is connected. It dereferences to the client, and when it goes out of
//! scope (normally, through `?`, or while unwinding) the client's connection is
//! released. Use [`Session::close`] to await a graceful shutdown instead.
//!
//! # Example
//!
//! ```ignore
//! async fn record(client: &DocumentStoreClient<MongoDbStoreBuilder>) -> DocumentStoreResult<()> {
//!     let session = client.session().await?;
//!     session.insert_one("daily_workout_logs", doc! { "workout_content": "Yoga" }).await?;
//!     Ok(())
//!     // connection released here, also on the error path above
//! }
//! ```

use std::ops::Deref;

use crate::{backend::StoreBackendBuilder, client::DocumentStoreClient, error::DocumentStoreResult};

/// Guard that keeps the client connected for its lifetime.
#[must_use = "dropping a session immediately releases the connection"]
pub struct Session<'a, C: StoreBackendBuilder> {
    client: &'a DocumentStoreClient<C>,
    released: bool,
}

impl<'a, C: StoreBackendBuilder> Session<'a, C> {
    pub(crate) fn new(client: &'a DocumentStoreClient<C>) -> Self {
        Self { client, released: false }
    }

    /// Ends the session, awaiting the backend's graceful shutdown.
    pub async fn close(mut self) -> DocumentStoreResult<()> {
        self.released = true;
        self.client.close().await
    }
}

impl<C: StoreBackendBuilder> Deref for Session<'_, C> {
    type Target = DocumentStoreClient<C>;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl<C: StoreBackendBuilder> Drop for Session<'_, C> {
    fn drop(&mut self) {
        if !self.released {
            self.client.release();
        }
    }
}
