//! Subscription system for live collection updates.
//!
//! This module tracks the watches an adapter has open against the backend:
//! - One [`SubscriptionEntry`] per (model, query fingerprint) key
//! - A [`ChangeHandler`] per entry that feeds pushed changes into the store
//! - A cancellation token per entry; cancelling it makes the handler inert
//!
//! # Example
//!
//! ```ignore
//! let registry = SubscriptionRegistry::new();
//! let key = WatchKey::collection("comment");
//!
//! if let Some(reservation) = registry.reserve(&key) {
//!     let handler = ChangeHandler::new("comment", store, CancellationToken::new());
//!     backend.watch(&handle, handler.clone(), &options).await?;
//!     reservation.complete(SubscriptionEntry::new(handle, handler));
//! }
//!
//! // Later: stop applying changes.
//! registry.unregister(&key);
//! ```

mod manager;
mod types;

pub use manager::{Reservation, SubscriptionRegistry};
pub use types::{ChangeHandler, SubscriptionEntry};
