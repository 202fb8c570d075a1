//! # Realtime Adapter
//!
//! An adapter between a client-side object store and a remote document
//! collection service that offers both point-in-time queries and live
//! change subscriptions.
//!
//! ## Core Concepts
//!
//! - **Verbs**: `find_record`, `find_all`, `find_many`, `query`,
//!   `query_record`, `create_record`, `update_record`, `delete_record`
//! - **Handles**: Each call binds its descriptor to a backend collection
//! - **Watches**: Reads of watch-eligible models open one standing
//!   subscription per (model, query) key, feeding changes into the store
//! - **Local-first queries**: A watched query is answered from the store
//!
//! ## Example
//!
//! ```ignore
//! use realtime_adapter::{Adapter, AdapterConfig, MemoryBackend, MemoryStore};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let store = Arc::new(MemoryStore::new());
//! let adapter = Adapter::new(
//!     AdapterConfig::default().watch_model("comment"),
//!     backend.clone(),
//!     store.clone(),
//! );
//!
//! // Fetch once; the watch is opened in the background
//! let comments = adapter.find_all("comment").await?;
//! store.load("comment", &comments);
//!
//! // Later changes arrive without another read
//! backend.push("comment", ChangeEvent::inserted(record));
//!
//! adapter.shutdown().await;
//! ```

pub mod adapter;
pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod resolver;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod watch;

// Re-exports
pub use adapter::Adapter;
pub use backend::{BackendClient, BackendOp, Cardinality, CollectionHandle, Cursor, MemoryBackend};
pub use config::{AdapterConfig, ModelPolicy, WatchOptions, DEFAULT_SUBSCRIPTION_NAME};
pub use error::{AdapterError, Result};
pub use executor::RequestExecutor;
pub use resolver::CollectionResolver;
pub use store::{MemoryStore, ObjectStore};
pub use subscriptions::{ChangeHandler, Reservation, SubscriptionEntry, SubscriptionRegistry};
pub use types::*;
pub use watch::{WatchController, WatchOutcome, Watchable};
