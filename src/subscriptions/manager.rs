//! Subscription registry tracking live watches per key.

use crate::error::{AdapterError, Result};
use crate::types::WatchKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::types::SubscriptionEntry;

/// Internal slot state for one key.
enum Slot {
    /// A watch is being established under this reservation id.
    Pending(u64),
    Active(SubscriptionEntry),
}

struct RegistryState {
    slots: HashMap<WatchKey, Slot>,
    closed: bool,
}

/// Tracks at most one watch per key.
///
/// Every mutation happens under a single lock that is never held across an
/// await. Establishing a watch spans a backend round-trip, so callers claim
/// the key first with [`reserve`](Self::reserve) and complete the
/// [`Reservation`] once the backend has accepted the watch.
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    /// Counter for generating reservation ids.
    next_reservation: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                slots: HashMap::new(),
                closed: false,
            }),
            next_reservation: AtomicU64::new(1),
        }
    }

    /// Whether an established watch exists for `key`.
    pub fn is_active(&self, key: &WatchKey) -> bool {
        matches!(self.state.lock().slots.get(key), Some(Slot::Active(_)))
    }

    /// Whether `key` is active or has an establishment in flight.
    pub fn is_claimed(&self, key: &WatchKey) -> bool {
        self.state.lock().slots.contains_key(key)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Insert an established entry.
    ///
    /// Fails `AlreadyRegistered` if the key is active and `Shutdown` after
    /// teardown; in both cases the rejected entry is cancelled. A pending
    /// reservation for the key is displaced.
    pub fn register(&self, key: WatchKey, entry: SubscriptionEntry) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            entry.cancel();
            return Err(AdapterError::Shutdown);
        }
        if let Some(Slot::Active(_)) = state.slots.get(&key) {
            entry.cancel();
            return Err(AdapterError::AlreadyRegistered(key));
        }
        debug!(%key, "Subscription registered");
        state.slots.insert(key, Slot::Active(entry));
        Ok(())
    }

    /// Whether `key` is active and its watch began after a full-set read.
    pub fn covers_full_set(&self, key: &WatchKey) -> bool {
        matches!(
            self.state.lock().slots.get(key),
            Some(Slot::Active(entry)) if entry.covers_full_set()
        )
    }

    /// Record that a full-set read for `key` finished while its watch was
    /// already live. Returns false if the key is not active.
    pub fn mark_full_set(&self, key: &WatchKey) -> bool {
        match self.state.lock().slots.get_mut(key) {
            Some(Slot::Active(entry)) => {
                if !entry.covers_full_set() {
                    debug!(%key, "Watch now covers full set");
                }
                entry.full_set = true;
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, key: &WatchKey) -> Option<SubscriptionEntry> {
        match self.state.lock().slots.get(key) {
            Some(Slot::Active(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Cancel and remove the entry for `key`. Returns false if nothing was
    /// registered or pending.
    pub fn unregister(&self, key: &WatchKey) -> bool {
        let removed = self.state.lock().slots.remove(key);
        match removed {
            Some(Slot::Active(entry)) => {
                entry.cancel();
                debug!(%key, "Subscription cancelled");
                true
            }
            Some(Slot::Pending(_)) => {
                debug!(%key, "Pending subscription abandoned");
                true
            }
            None => false,
        }
    }

    /// Claim `key` for a new watch.
    ///
    /// Returns None if the key is already active or pending, or the registry
    /// has been torn down.
    pub fn reserve(&self, key: &WatchKey) -> Option<Reservation<'_>> {
        let mut state = self.state.lock();
        if state.closed || state.slots.contains_key(key) {
            return None;
        }
        let id = self.next_reservation.fetch_add(1, Ordering::SeqCst);
        state.slots.insert(key.clone(), Slot::Pending(id));
        Some(Reservation {
            registry: self,
            key: key.clone(),
            id,
            done: false,
        })
    }

    /// Active keys, sorted.
    pub fn keys(&self) -> Vec<WatchKey> {
        let state = self.state.lock();
        let mut keys: Vec<_> = state
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of active entries.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every entry and refuse further registrations.
    ///
    /// Returns the number of active entries cancelled.
    pub fn teardown(&self) -> usize {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.slots)
        };

        let mut cancelled = 0;
        for (_, slot) in drained {
            if let Slot::Active(entry) = slot {
                entry.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, "Subscriptions torn down");
        }
        cancelled
    }

    /// Turn a pending slot into an active one, if it is still ours.
    fn activate(&self, key: &WatchKey, id: u64, entry: SubscriptionEntry) -> bool {
        let mut state = self.state.lock();
        let ours = matches!(state.slots.get(key), Some(Slot::Pending(pending)) if *pending == id);
        if !ours || state.closed {
            entry.cancel();
            return false;
        }
        debug!(%key, "Subscription registered");
        state.slots.insert(key.clone(), Slot::Active(entry));
        true
    }

    fn release(&self, key: &WatchKey, id: u64) {
        let mut state = self.state.lock();
        let ours = matches!(state.slots.get(key), Some(Slot::Pending(pending)) if *pending == id);
        if ours {
            state.slots.remove(key);
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Claim on a key while its watch is being established.
///
/// Dropping an uncompleted reservation frees the key again.
pub struct Reservation<'a> {
    registry: &'a SubscriptionRegistry,
    key: WatchKey,
    id: u64,
    done: bool,
}

impl Reservation<'_> {
    pub fn key(&self) -> &WatchKey {
        &self.key
    }

    /// Register the established entry.
    ///
    /// Returns false, cancelling the entry, if the key was unregistered or
    /// the registry torn down while the watch was being set up.
    pub fn complete(mut self, entry: SubscriptionEntry) -> bool {
        self.done = true;
        self.registry.activate(&self.key, self.id, entry)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.registry.release(&self.key, self.id);
        }
    }
}
