//! Binding request descriptors to backend collections.

use crate::backend::{BackendClient, CollectionHandle};
use crate::config::AdapterConfig;
use crate::error::{AdapterError, Result};
use crate::types::{OperationKind, RequestDescriptor};
use std::sync::Arc;
use tracing::trace;

/// Validates descriptors and binds them to collection handles.
///
/// Resolving never touches subscription state.
#[derive(Clone)]
pub struct CollectionResolver {
    config: Arc<AdapterConfig>,
    backend: Arc<dyn BackendClient>,
}

impl CollectionResolver {
    pub fn new(config: Arc<AdapterConfig>, backend: Arc<dyn BackendClient>) -> Self {
        Self { config, backend }
    }

    /// Check that a descriptor carries what its operation needs.
    pub fn validate(&self, descriptor: &RequestDescriptor) -> Result<()> {
        let model = descriptor.model.as_str();
        let fail = |reason: &str| Err(AdapterError::binding(model, reason));

        if model.is_empty() {
            return fail("model name is empty");
        }
        if model.trim() != model {
            return fail("model name has surrounding whitespace");
        }
        if self.config.strict_models && self.config.policy(model).is_none() {
            return fail("model is not configured");
        }

        match descriptor.kind {
            OperationKind::FindRecord | OperationKind::DeleteRecord if descriptor.id.is_none() => {
                fail("missing id")
            }
            OperationKind::FindMany
                if descriptor.ids.as_ref().map_or(true, |ids| ids.is_empty()) =>
            {
                fail("missing ids")
            }
            OperationKind::Query | OperationKind::QueryRecord if descriptor.query.is_none() => {
                fail("missing query")
            }
            OperationKind::CreateRecord if descriptor.payload.is_none() => fail("missing payload"),
            OperationKind::UpdateRecord => match &descriptor.payload {
                None => fail("missing payload"),
                Some(payload) if payload.id().is_none() => fail("payload has no id"),
                Some(_) => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Validate, then bind to the model's collection.
    pub async fn resolve(&self, descriptor: &RequestDescriptor) -> Result<CollectionHandle> {
        self.validate(descriptor)?;
        let collection = self.config.collection_for(&descriptor.model);
        trace!(model = %descriptor.model, collection, kind = %descriptor.kind, "Binding collection");
        self.backend.bind_collection(collection, descriptor).await
    }
}
