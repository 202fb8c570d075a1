//! The client-side object store the adapter feeds.
//!
//! The adapter only ever talks to the store through [`ObjectStore`]: three
//! mutations driven by change events and one synchronous local read used for
//! local-first queries. [`MemoryStore`] is an in-process implementation.

use crate::types::{Identifier, Payload, Query, Record};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Mutation and local-read API of the object store.
pub trait ObjectStore: Send + Sync {
    fn insert(&self, model: &str, record: Record);

    fn update(&self, model: &str, record: Record);

    fn remove(&self, model: &str, id: &Identifier);

    /// Records currently cached for `model`. Filtering by `query` is the
    /// store's business.
    fn peek_all(&self, model: &str, query: Option<&Query>) -> Vec<Record>;
}

/// In-memory object store keyed by model, then identifier.
#[derive(Default)]
pub struct MemoryStore {
    models: RwLock<HashMap<String, BTreeMap<Identifier, Record>>>,
    mutations: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a payload returned by a read verb, the way a store would after
    /// the adapter resolves.
    pub fn load(&self, model: &str, payload: &Payload) {
        for record in payload.clone().into_records() {
            self.upsert(model, record);
        }
    }

    pub fn get(&self, model: &str, id: &Identifier) -> Option<Record> {
        self.models.read().get(model).and_then(|m| m.get(id)).cloned()
    }

    pub fn contains(&self, model: &str, id: &Identifier) -> bool {
        self.get(model, id).is_some()
    }

    pub fn len(&self, model: &str) -> usize {
        self.models.read().get(model).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, model: &str) -> bool {
        self.len(model) == 0
    }

    /// Number of mutations applied through [`ObjectStore`].
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    fn upsert(&self, model: &str, record: Record) -> bool {
        let Some(id) = record.id() else {
            warn!(model, "Dropping record without an id");
            return false;
        };
        self.models
            .write()
            .entry(model.to_string())
            .or_default()
            .insert(id, record);
        true
    }
}

impl ObjectStore for MemoryStore {
    fn insert(&self, model: &str, record: Record) {
        if self.upsert(model, record) {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn update(&self, model: &str, record: Record) {
        if self.upsert(model, record) {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn remove(&self, model: &str, id: &Identifier) {
        if let Some(records) = self.models.write().get_mut(model) {
            records.remove(id);
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn peek_all(&self, model: &str, query: Option<&Query>) -> Vec<Record> {
        let models = self.models.read();
        let Some(records) = models.get(model) else {
            return Vec::new();
        };
        records
            .values()
            .filter(|r| query.map(|q| q.matches(r)).unwrap_or(true))
            .cloned()
            .collect()
    }
}
