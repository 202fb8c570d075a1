//! In-process backend collection service.

use super::{BackendClient, Cardinality, CollectionHandle, Cursor};
use crate::config::WatchOptions;
use crate::error::{AdapterError, Result};
use crate::subscriptions::ChangeHandler;
use crate::types::{ChangeEvent, ChangeKind, Identifier, Payload, Query, Record, RequestDescriptor};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::trace;

/// Backend calls, for counting and fault injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Bind,
    Find,
    FindMany,
    Fetch,
    Store,
    Replace,
    Remove,
    Watch,
}

struct Watcher {
    collection: String,
    query: Option<Query>,
    name: String,
    handler: ChangeHandler,
}

impl Watcher {
    fn wants(&self, collection: &str, event: &ChangeEvent) -> bool {
        if self.collection != collection || self.handler.is_cancelled() {
            return false;
        }
        match (&self.query, event.kind) {
            (None, _) | (Some(_), ChangeKind::Removed) => true,
            (Some(query), _) => query.matches(&event.record),
        }
    }
}

/// Collections held in memory, with live fan-out to watchers.
///
/// Every call yields to the scheduler once before doing its work, so
/// concurrent verbs interleave the way they would against a remote service.
/// Writes are pushed to matching watchers as change events.
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, BTreeMap<Identifier, Record>>>,
    watchers: Mutex<Vec<Watcher>>,
    calls: Mutex<HashMap<BackendOp, usize>>,
    faults: Mutex<HashSet<BackendOp>>,
    /// Next auto-assigned integer id.
    next_id: AtomicI64,
    enforce_unique: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            watchers: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashSet::new()),
            next_id: AtomicI64::new(1),
            enforce_unique: true,
        }
    }

    /// A backend that lets `store` overwrite existing ids.
    pub fn without_unique_ids() -> Self {
        Self {
            enforce_unique: false,
            ..Self::new()
        }
    }

    /// Insert records directly, without notifying watchers.
    pub fn seed(&self, collection: &str, records: impl IntoIterator<Item = Record>) {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        for record in records {
            if let Some(id) = record.id() {
                self.bump_next_id(&id);
                target.insert(id, record);
            }
        }
    }

    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.collections
            .read()
            .get(collection)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Make every later call of `op` fail with `BackendUnavailable`.
    pub fn fail(&self, op: BackendOp) {
        self.faults.lock().insert(op);
    }

    pub fn recover(&self, op: BackendOp) {
        self.faults.lock().remove(&op);
    }

    /// How many times `op` has been called, failed calls included.
    pub fn calls(&self, op: BackendOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Watchers whose handler has not been cancelled.
    pub fn live_watchers(&self) -> usize {
        self.watchers
            .lock()
            .iter()
            .filter(|w| !w.handler.is_cancelled())
            .count()
    }

    /// Subscription names watches were registered under.
    pub fn watch_names(&self) -> Vec<String> {
        self.watchers.lock().iter().map(|w| w.name.clone()).collect()
    }

    /// Push a change to every matching watcher of `collection`, in
    /// registration order. Returns how many handlers applied it.
    pub fn push(&self, collection: &str, event: ChangeEvent) -> usize {
        let handlers: Vec<ChangeHandler> = {
            let mut watchers = self.watchers.lock();
            watchers.retain(|w| !w.handler.is_cancelled());
            watchers
                .iter()
                .filter(|w| w.wants(collection, &event))
                .map(|w| w.handler.clone())
                .collect()
        };

        handlers
            .into_iter()
            .filter(|handler| handler.handle(event.clone()))
            .count()
    }

    async fn enter(&self, op: BackendOp) -> Result<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        tokio::task::yield_now().await;
        if self.faults.lock().contains(&op) {
            return Err(AdapterError::BackendUnavailable(format!(
                "{:?} failed: connection refused",
                op
            )));
        }
        Ok(())
    }

    fn bump_next_id(&self, id: &Identifier) {
        if let Identifier::Int(i) = id {
            self.next_id.fetch_max(i.saturating_add(1), Ordering::SeqCst);
        }
    }

    /// Hand out the next integer id. Stays at `i64::MAX` once reached.
    fn allocate_id(&self) -> i64 {
        match self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
        {
            Ok(id) | Err(id) => id,
        }
    }

    fn payload_of(handle: &CollectionHandle) -> Result<Record> {
        handle
            .payload()
            .cloned()
            .ok_or_else(|| AdapterError::binding(handle.model(), "missing payload"))
    }

    fn target_id(handle: &CollectionHandle) -> Result<Identifier> {
        handle
            .id()
            .cloned()
            .or_else(|| handle.payload().and_then(Record::id))
            .ok_or_else(|| AdapterError::binding(handle.model(), "missing id"))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendClient for MemoryBackend {
    async fn bind_collection(
        &self,
        collection: &str,
        descriptor: &RequestDescriptor,
    ) -> Result<CollectionHandle> {
        self.enter(BackendOp::Bind).await?;
        Ok(CollectionHandle::bind(collection, descriptor))
    }

    async fn find(&self, handle: &CollectionHandle) -> Result<Cursor> {
        self.enter(BackendOp::Find).await?;
        Ok(Cursor::one(handle.clone()))
    }

    async fn find_many(&self, handle: &CollectionHandle) -> Result<Cursor> {
        self.enter(BackendOp::FindMany).await?;
        Ok(Cursor::many(handle.clone()))
    }

    async fn fetch(&self, cursor: Cursor) -> Result<Payload> {
        self.enter(BackendOp::Fetch).await?;

        let handle = &cursor.handle;
        let collections = self.collections.read();
        let empty = BTreeMap::new();
        let records = collections.get(handle.collection()).unwrap_or(&empty);
        let matching = |r: &&Record| handle.query().map(|q| q.matches(r)).unwrap_or(true);

        let payload = match cursor.cardinality {
            Cardinality::One => {
                let found = match handle.id() {
                    Some(id) => records.get(id),
                    None => records.values().find(matching),
                };
                found.cloned().map(Payload::Record).unwrap_or(Payload::Empty)
            }
            Cardinality::Many => {
                let found: Vec<Record> = match handle.ids() {
                    Some(ids) => ids.iter().filter_map(|id| records.get(id)).cloned().collect(),
                    None => records.values().filter(matching).cloned().collect(),
                };
                Payload::Records(found)
            }
        };
        trace!(collection = handle.collection(), "Fetched snapshot");
        Ok(payload)
    }

    async fn store(&self, handle: &CollectionHandle) -> Result<Payload> {
        self.enter(BackendOp::Store).await?;

        let mut record = Self::payload_of(handle)?;
        {
            let mut collections = self.collections.write();
            let target = collections.entry(handle.collection().to_string()).or_default();
            let id = match record.id() {
                Some(id) => {
                    if self.enforce_unique && target.contains_key(&id) {
                        return Err(AdapterError::Conflict {
                            model: handle.model().to_string(),
                            id,
                        });
                    }
                    self.bump_next_id(&id);
                    id
                }
                None => {
                    let id = Identifier::Int(self.allocate_id());
                    if target.contains_key(&id) {
                        return Err(AdapterError::Conflict {
                            model: handle.model().to_string(),
                            id,
                        });
                    }
                    record.set_id(&id);
                    id
                }
            };
            target.insert(id, record.clone());
        }

        self.push(handle.collection(), ChangeEvent::inserted(record.clone()));
        Ok(Payload::Record(record))
    }

    async fn replace(&self, handle: &CollectionHandle) -> Result<Payload> {
        self.enter(BackendOp::Replace).await?;

        let mut record = Self::payload_of(handle)?;
        let id = Self::target_id(handle)?;
        record.set_id(&id);
        {
            let mut collections = self.collections.write();
            let existing = collections
                .get_mut(handle.collection())
                .and_then(|m| m.get_mut(&id));
            match existing {
                Some(slot) => *slot = record.clone(),
                None => return Err(AdapterError::not_found(handle.model(), id)),
            }
        }

        self.push(handle.collection(), ChangeEvent::updated(record.clone()));
        Ok(Payload::Record(record))
    }

    async fn remove(&self, handle: &CollectionHandle) -> Result<()> {
        self.enter(BackendOp::Remove).await?;

        let id = Self::target_id(handle)?;
        let removed = self
            .collections
            .write()
            .get_mut(handle.collection())
            .and_then(|m| m.remove(&id));

        match removed {
            Some(record) => {
                self.push(handle.collection(), ChangeEvent::removed(record));
                Ok(())
            }
            None => Err(AdapterError::not_found(handle.model(), id)),
        }
    }

    async fn watch(
        &self,
        handle: &CollectionHandle,
        handler: ChangeHandler,
        options: &WatchOptions,
    ) -> Result<()> {
        self.enter(BackendOp::Watch).await?;

        self.watchers.lock().push(Watcher {
            collection: handle.collection().to_string(),
            query: handle.query().cloned(),
            name: options.name.clone(),
            handler,
        });
        Ok(())
    }
}
