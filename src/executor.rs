//! One-shot backend operations against a bound collection.

use crate::backend::{BackendClient, Cardinality, CollectionHandle, Cursor};
use crate::error::{AdapterError, Result};
use crate::types::{OperationKind, Payload};
use std::sync::Arc;
use tracing::debug;

/// Runs find/fetch/store/replace/remove against the backend.
///
/// Failures are passed through untouched; retries belong to the transport.
#[derive(Clone)]
pub struct RequestExecutor {
    backend: Arc<dyn BackendClient>,
}

impl RequestExecutor {
    pub fn new(backend: Arc<dyn BackendClient>) -> Self {
        Self { backend }
    }

    pub async fn find_one(&self, handle: &CollectionHandle) -> Result<Cursor> {
        self.backend.find(handle).await
    }

    pub async fn find_many(&self, handle: &CollectionHandle) -> Result<Cursor> {
        self.backend.find_many(handle).await
    }

    /// Materialize an issued find.
    ///
    /// Single-record cursors come back as `Record` or `Empty`; an empty
    /// result for a lookup by id is `NotFound`.
    pub async fn fetch(&self, cursor: Cursor) -> Result<Payload> {
        let cardinality = cursor.cardinality;
        let model = cursor.handle.model().to_string();
        let lookup_id = match cursor.handle.kind() {
            OperationKind::FindRecord => cursor.handle.id().cloned(),
            _ => None,
        };

        let payload = self.backend.fetch(cursor).await?;

        let payload = match (cardinality, payload) {
            (Cardinality::One, Payload::Records(mut records)) => match records.len() {
                0 => Payload::Empty,
                _ => Payload::Record(records.swap_remove(0)),
            },
            (Cardinality::Many, Payload::Record(record)) => Payload::Records(vec![record]),
            (Cardinality::Many, Payload::Empty) => Payload::Records(Vec::new()),
            (_, payload) => payload,
        };

        match (payload, lookup_id) {
            (Payload::Empty, Some(id)) => Err(AdapterError::not_found(model, id)),
            (payload, _) => Ok(payload),
        }
    }

    pub async fn store(&self, handle: &CollectionHandle) -> Result<Payload> {
        debug!(collection = handle.collection(), "Storing record");
        self.backend.store(handle).await
    }

    pub async fn replace(&self, handle: &CollectionHandle) -> Result<Payload> {
        debug!(collection = handle.collection(), id = ?handle.id(), "Replacing record");
        self.backend.replace(handle).await
    }

    pub async fn remove(&self, handle: &CollectionHandle) -> Result<()> {
        debug!(collection = handle.collection(), id = ?handle.id(), "Removing record");
        self.backend.remove(handle).await
    }
}
