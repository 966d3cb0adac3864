//! Local cache and live-sync layer for the medical-education portal.
//!
//! - [`cache`]: TTL-bounded, versioned local cache of whole collections
//! - [`sync`]: generic live subscription that mirrors a remote collection,
//!   writes through to the cache and falls back to it when offline
//! - [`connectivity`]: the shared online/offline signal
//! - [`store`]: the remote document store interface and an in-memory store
//! - [`entities`]: records and projections for each portal collection

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod entities;
pub mod store;
pub mod sync;

pub use cache::CacheManager;
pub use connectivity::{ConnectionStatus, ConnectivityMonitor};
pub use store::{DocumentStore, MemoryStore};
pub use sync::{CollectionSync, Entity, RecordId, SyncError, SyncState};
