//! Subscription types for live collection updates.

use crate::backend::CollectionHandle;
use crate::store::ObjectStore;
use crate::types::{ChangeEvent, ChangeKind};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Applies pushed change events to the object store.
///
/// Events are applied one at a time, in the order the backend delivers them.
/// Once [`cancel`](Self::cancel) returns, no delivery is mid-mutation and
/// every further delivery is a no-op, whichever thread it arrives on.
#[derive(Clone)]
pub struct ChangeHandler {
    model: String,
    store: Arc<dyn ObjectStore>,
    token: CancellationToken,
    /// Held across the cancelled check and the store mutation.
    gate: Arc<Mutex<()>>,
}

impl ChangeHandler {
    pub fn new(model: impl Into<String>, store: Arc<dyn ObjectStore>, token: CancellationToken) -> Self {
        Self {
            model: model.into(),
            store,
            token,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, waiting out any delivery already applying.
    pub fn cancel(&self) {
        let _gate = self.gate.lock();
        self.token.cancel();
    }

    /// Apply one event. Returns false if nothing was mutated.
    pub fn handle(&self, event: ChangeEvent) -> bool {
        let _gate = self.gate.lock();
        if self.token.is_cancelled() {
            trace!(model = %self.model, kind = ?event.kind, "Ignoring change for cancelled watch");
            return false;
        }

        trace!(model = %self.model, kind = ?event.kind, id = ?event.record.id(), "Applying change");
        match event.kind {
            ChangeKind::Inserted => self.store.insert(&self.model, event.record),
            ChangeKind::Updated => self.store.update(&self.model, event.record),
            ChangeKind::Removed => match event.record.id() {
                Some(id) => self.store.remove(&self.model, &id),
                None => {
                    warn!(model = %self.model, "Removal event without an id");
                    return false;
                }
            },
        }
        true
    }
}

impl fmt::Debug for ChangeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeHandler")
            .field("model", &self.model)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// A live watch held by the registry.
#[derive(Clone, Debug)]
pub struct SubscriptionEntry {
    /// Handle the watch was issued against.
    pub handle: CollectionHandle,
    pub handler: ChangeHandler,
    cancel: CancellationToken,
    /// The store held the key's whole result set when the watch went live.
    pub(super) full_set: bool,
}

impl SubscriptionEntry {
    /// The entry shares the handler's cancellation token.
    pub fn new(handle: CollectionHandle, handler: ChangeHandler) -> Self {
        let cancel = handler.token().clone();
        Self {
            handle,
            handler,
            cancel,
            full_set: false,
        }
    }

    /// Mark whether the read behind this watch loaded every matching record.
    pub fn with_full_set(mut self, full_set: bool) -> Self {
        self.full_set = full_set;
        self
    }

    /// Whether the local store can answer for this key on its own.
    pub fn covers_full_set(&self) -> bool {
        self.full_set
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.handler.cancel();
    }
}
