//! Watch establishment after successful reads.
//!
//! A read of a watch-eligible model is followed by an attempt to open a
//! standing backend watch for the same (model, query) key. The attempt is
//! idempotent: a key that is already watched, or is being watched by a
//! concurrent attempt, is left alone. Failures are logged and swallowed,
//! since the read that triggered the attempt has already been answered.
//!
//! Single-record and by-id reads share the key of their model or query but
//! load only part of its result set. A watch remembers whether a full-set
//! read (`find_all` or `query`) has completed under it; only then may the
//! local store answer for the key.

use crate::backend::BackendClient;
use crate::config::{AdapterConfig, WatchOptions};
use crate::resolver::CollectionResolver;
use crate::store::ObjectStore;
use crate::subscriptions::{ChangeHandler, SubscriptionEntry, SubscriptionRegistry};
use crate::types::{RequestDescriptor, WatchKey};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// What a call to [`Watchable::maybe_establish`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The model is not configured for live sync.
    Ineligible,
    /// The key is already watched or being watched.
    AlreadyWatching,
    Established,
    /// Binding or the backend watch call failed.
    Failed,
    /// The key was unwatched, or the adapter shut down, mid-establishment.
    Cancelled,
}

/// Live-watch capability the adapter facade depends on.
#[async_trait]
pub trait Watchable: Send + Sync {
    fn is_watching(&self, key: &WatchKey) -> bool;

    /// Whether `key` is watched and the store holds its whole result set.
    fn covers_full_set(&self, key: &WatchKey) -> bool;

    /// Open a watch for the descriptor's key if policy allows and none exists.
    /// Never fails.
    async fn maybe_establish(&self, descriptor: RequestDescriptor) -> WatchOutcome;

    /// Cancel the watch for `key`. Returns false if there was none.
    fn unwatch(&self, key: &WatchKey) -> bool;

    /// Cancel every watch. Returns how many were active.
    fn teardown(&self) -> usize;
}

/// Registry-backed [`Watchable`].
pub struct WatchController {
    config: Arc<AdapterConfig>,
    resolver: CollectionResolver,
    backend: Arc<dyn BackendClient>,
    store: Arc<dyn ObjectStore>,
    registry: SubscriptionRegistry,
    options: WatchOptions,
}

impl WatchController {
    pub fn new(
        config: Arc<AdapterConfig>,
        backend: Arc<dyn BackendClient>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            options: config.watch_options(),
            resolver: CollectionResolver::new(Arc::clone(&config), Arc::clone(&backend)),
            config,
            backend,
            store,
            registry: SubscriptionRegistry::new(),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

#[async_trait]
impl Watchable for WatchController {
    fn is_watching(&self, key: &WatchKey) -> bool {
        self.registry.is_active(key)
    }

    fn covers_full_set(&self, key: &WatchKey) -> bool {
        self.registry.covers_full_set(key)
    }

    async fn maybe_establish(&self, descriptor: RequestDescriptor) -> WatchOutcome {
        let key = descriptor.watch_key();

        if !descriptor.kind.is_read() || !self.config.is_watch_eligible(&descriptor.model) {
            trace!(%key, kind = %descriptor.kind, "Not eligible for watch");
            return WatchOutcome::Ineligible;
        }

        let Some(reservation) = self.registry.reserve(&key) else {
            if self.registry.is_closed() {
                return WatchOutcome::Cancelled;
            }
            if descriptor.kind.is_full_read() && self.registry.mark_full_set(&key) {
                trace!(%key, "Watch already active, full set loaded");
            } else {
                trace!(%key, "Watch already active");
            }
            return WatchOutcome::AlreadyWatching;
        };

        let handle = match self.resolver.resolve(&descriptor.for_watch()).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(%key, error = %e, "Problem binding collection for watch");
                return WatchOutcome::Failed;
            }
        };

        let handler = ChangeHandler::new(
            descriptor.model.clone(),
            Arc::clone(&self.store),
            CancellationToken::new(),
        );

        if let Err(e) = self.backend.watch(&handle, handler.clone(), &self.options).await {
            handler.cancel();
            warn!(%key, error = %e, "Problem setting up watch");
            return WatchOutcome::Failed;
        }

        let entry = SubscriptionEntry::new(handle, handler)
            .with_full_set(descriptor.kind.is_full_read());
        if reservation.complete(entry) {
            debug!(%key, name = %self.options.name, "Watch established");
            WatchOutcome::Established
        } else {
            debug!(%key, "Watch cancelled during establishment");
            WatchOutcome::Cancelled
        }
    }

    fn unwatch(&self, key: &WatchKey) -> bool {
        self.registry.unregister(key)
    }

    fn teardown(&self) -> usize {
        self.registry.teardown()
    }
}
