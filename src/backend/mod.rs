//! Backend collection service interface.
//!
//! The adapter drives a document collection service through
//! [`BackendClient`]. Reads are two-phase: `find`/`find_many` turn a bound
//! [`CollectionHandle`] into a [`Cursor`], and `fetch` materializes the
//! cursor into a [`Payload`] snapshot. Live updates come through `watch`,
//! which hands every change for the handle to a [`ChangeHandler`] until the
//! handler's token is cancelled.
//!
//! [`MemoryBackend`] is an in-process implementation with fault injection.

mod memory;

pub use memory::{BackendOp, MemoryBackend};

use crate::config::WatchOptions;
use crate::error::Result;
use crate::subscriptions::ChangeHandler;
use crate::types::{Identifier, OperationKind, Payload, Query, Record, RequestDescriptor};
use async_trait::async_trait;

/// Opaque reference to a backend collection, bound from one descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionHandle {
    collection: String,
    descriptor: RequestDescriptor,
}

impl CollectionHandle {
    pub fn bind(collection: impl Into<String>, descriptor: &RequestDescriptor) -> Self {
        Self {
            collection: collection.into(),
            descriptor: descriptor.clone(),
        }
    }

    /// Backend collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn model(&self) -> &str {
        &self.descriptor.model
    }

    pub fn kind(&self) -> OperationKind {
        self.descriptor.kind
    }

    pub fn id(&self) -> Option<&Identifier> {
        self.descriptor.id.as_ref()
    }

    pub fn ids(&self) -> Option<&[Identifier]> {
        self.descriptor.ids.as_deref()
    }

    pub fn query(&self) -> Option<&Query> {
        self.descriptor.query.as_ref()
    }

    pub fn payload(&self) -> Option<&Record> {
        self.descriptor.payload.as_ref()
    }
}

/// How many records a cursor is expected to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// An issued find, waiting to be fetched.
#[derive(Clone, Debug, PartialEq)]
pub struct Cursor {
    pub handle: CollectionHandle,
    pub cardinality: Cardinality,
}

impl Cursor {
    pub fn one(handle: CollectionHandle) -> Self {
        Self {
            handle,
            cardinality: Cardinality::One,
        }
    }

    pub fn many(handle: CollectionHandle) -> Self {
        Self {
            handle,
            cardinality: Cardinality::Many,
        }
    }
}

/// Calls offered by the backend collection service.
///
/// Every call is an await point and may fail with
/// [`AdapterError::BackendUnavailable`](crate::AdapterError::BackendUnavailable).
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Bind a descriptor to the named collection.
    async fn bind_collection(
        &self,
        collection: &str,
        descriptor: &RequestDescriptor,
    ) -> Result<CollectionHandle>;

    /// Issue a single-record find.
    async fn find(&self, handle: &CollectionHandle) -> Result<Cursor>;

    /// Issue a multi-record find (by ids, by query, or the whole collection).
    async fn find_many(&self, handle: &CollectionHandle) -> Result<Cursor>;

    /// Materialize an issued find.
    async fn fetch(&self, cursor: Cursor) -> Result<Payload>;

    /// Create the handle's payload. Fails `Conflict` on a duplicate id.
    async fn store(&self, handle: &CollectionHandle) -> Result<Payload>;

    /// Replace the record with the payload's id. Fails `NotFound` if absent.
    async fn replace(&self, handle: &CollectionHandle) -> Result<Payload>;

    /// Remove the record with the handle's id. Fails `NotFound` if absent.
    async fn remove(&self, handle: &CollectionHandle) -> Result<()>;

    /// Start pushing changes for the handle into `handler`.
    async fn watch(
        &self,
        handle: &CollectionHandle,
        handler: ChangeHandler,
        options: &WatchOptions,
    ) -> Result<()>;
}
