//! Verb-level entry points tying the adapter together.

use crate::backend::BackendClient;
use crate::config::AdapterConfig;
use crate::error::Result;
use crate::executor::RequestExecutor;
use crate::resolver::CollectionResolver;
use crate::store::ObjectStore;
use crate::types::{Identifier, OperationKind, Payload, Query, Record, RequestDescriptor, WatchKey};
use crate::watch::{WatchController, Watchable};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The store adapter.
///
/// Provides one async method per store verb:
/// - Reads (`find_record`, `find_all`, `find_many`, `query`, `query_record`)
///   bind, find and fetch, then schedule watch establishment in the
///   background for watch-eligible models
/// - Writes (`create_record`, `update_record`, `delete_record`) make a single
///   backend call and never touch watches
///
/// Each call yields exactly one `Result`. Watch establishment runs after the
/// read has been answered and cannot change its outcome. The adapter owns its
/// subscription registry; [`shutdown`](Self::shutdown) or dropping the adapter
/// cancels every watch.
pub struct Adapter {
    config: Arc<AdapterConfig>,
    resolver: CollectionResolver,
    executor: RequestExecutor,
    watcher: Arc<dyn Watchable>,
    store: Arc<dyn ObjectStore>,
    /// Background watch establishments not yet awaited.
    follow_ups: Mutex<Vec<JoinHandle<()>>>,
}

impl Adapter {
    pub fn new(
        config: AdapterConfig,
        backend: Arc<dyn BackendClient>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let config = Arc::new(config);
        let watcher = Arc::new(WatchController::new(
            Arc::clone(&config),
            Arc::clone(&backend),
            Arc::clone(&store),
        ));
        Self::with_watcher(config, backend, store, watcher)
    }

    /// Build an adapter around a caller-supplied watch capability.
    pub fn with_watcher(
        config: Arc<AdapterConfig>,
        backend: Arc<dyn BackendClient>,
        store: Arc<dyn ObjectStore>,
        watcher: Arc<dyn Watchable>,
    ) -> Self {
        Self {
            resolver: CollectionResolver::new(Arc::clone(&config), Arc::clone(&backend)),
            executor: RequestExecutor::new(backend),
            config,
            watcher,
            store,
            follow_ups: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    // --- Reads ---

    pub async fn find_record(&self, model: &str, id: impl Into<Identifier>) -> Result<Payload> {
        self.read(RequestDescriptor::find_record(model, id.into()))
            .await
    }

    pub async fn find_all(&self, model: &str) -> Result<Payload> {
        self.read(RequestDescriptor::find_all(model)).await
    }

    pub async fn find_many(&self, model: &str, ids: Vec<Identifier>) -> Result<Payload> {
        self.read(RequestDescriptor::find_many(model, ids)).await
    }

    /// Query the backend, or the local store when a live watch guarantees it
    /// holds every match: either this query's watch or the model's
    /// collection watch, begun after a full-set read.
    pub async fn query(&self, model: &str, query: Query) -> Result<Payload> {
        let descriptor = RequestDescriptor::query(model, query);
        self.resolver.validate(&descriptor)?;

        let key = descriptor.watch_key();
        if self.watcher.covers_full_set(&key)
            || self.watcher.covers_full_set(&WatchKey::collection(model))
        {
            debug!(%key, "Serving query from local store");
            let records = self.store.peek_all(model, descriptor.query.as_ref());
            return Ok(Payload::Records(records));
        }

        self.read(descriptor).await
    }

    pub async fn query_record(&self, model: &str, query: Query) -> Result<Payload> {
        self.read(RequestDescriptor::query_record(model, query))
            .await
    }

    // --- Writes ---

    pub async fn create_record(&self, model: &str, payload: Record) -> Result<Payload> {
        self.write(RequestDescriptor::create_record(model, payload))
            .await
    }

    pub async fn update_record(&self, model: &str, payload: Record) -> Result<Payload> {
        self.write(RequestDescriptor::update_record(model, payload))
            .await
    }

    pub async fn delete_record(&self, model: &str, id: impl Into<Identifier>) -> Result<()> {
        self.write(RequestDescriptor::delete_record(model, id.into()))
            .await
            .map(|_| ())
    }

    // --- Watches ---

    pub fn is_watching(&self, model: &str, query: Option<&Query>) -> bool {
        self.watcher.is_watching(&WatchKey::new(model, query))
    }

    /// Cancel the watch for a model (and query). Returns false if none existed.
    pub fn unwatch(&self, model: &str, query: Option<&Query>) -> bool {
        self.watcher.unwatch(&WatchKey::new(model, query))
    }

    /// Wait for every background watch establishment scheduled so far.
    pub async fn settle_watches(&self) {
        loop {
            let pending = std::mem::take(&mut *self.follow_ups.lock());
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(e) = task.await {
                    warn!(error = %e, "Watch establishment task did not complete");
                }
            }
        }
    }

    /// Settle outstanding establishments, then cancel every watch.
    pub async fn shutdown(&self) {
        self.settle_watches().await;
        self.watcher.teardown();
    }

    async fn read(&self, descriptor: RequestDescriptor) -> Result<Payload> {
        debug!(model = %descriptor.model, kind = %descriptor.kind, "Dispatching read");

        let result = self.fetch(&descriptor).await;
        match &result {
            Ok(_) => self.follow_up(descriptor),
            Err(e) => warn!(model = %descriptor.model, kind = %descriptor.kind, error = %e, "Read failed"),
        }
        result
    }

    async fn fetch(&self, descriptor: &RequestDescriptor) -> Result<Payload> {
        let handle = self.resolver.resolve(descriptor).await?;
        let cursor = match descriptor.kind {
            OperationKind::FindRecord | OperationKind::QueryRecord => {
                self.executor.find_one(&handle).await?
            }
            _ => self.executor.find_many(&handle).await?,
        };
        self.executor.fetch(cursor).await
    }

    async fn write(&self, descriptor: RequestDescriptor) -> Result<Payload> {
        debug!(model = %descriptor.model, kind = %descriptor.kind, "Dispatching write");

        let result = self.store_change(&descriptor).await;
        if let Err(e) = &result {
            warn!(model = %descriptor.model, kind = %descriptor.kind, error = %e, "Write failed");
        }
        result
    }

    async fn store_change(&self, descriptor: &RequestDescriptor) -> Result<Payload> {
        let handle = self.resolver.resolve(descriptor).await?;
        match descriptor.kind {
            OperationKind::CreateRecord => self.executor.store(&handle).await,
            OperationKind::UpdateRecord => self.executor.replace(&handle).await,
            _ => self.executor.remove(&handle).await.map(|()| Payload::Empty),
        }
    }

    /// Schedule watch establishment without holding up the caller.
    fn follow_up(&self, descriptor: RequestDescriptor) {
        let watcher = Arc::clone(&self.watcher);
        let task = tokio::spawn(async move {
            watcher.maybe_establish(descriptor).await;
        });

        let mut follow_ups = self.follow_ups.lock();
        follow_ups.retain(|t| !t.is_finished());
        follow_ups.push(task);
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        for task in self.follow_ups.get_mut().drain(..) {
            task.abort();
        }
        self.watcher.teardown();
    }
}
