//! Local cache for offline and degraded operation.
//!
//! This module provides a best-effort, TTL-bounded cache that:
//! - Stores one JSON blob per logical type under a fixed key prefix
//! - Stamps every entry with a write time and a schema version
//! - Evicts lazily when an entry is found expired or version-mismatched
//! - Never fails the caller; storage problems behave like a miss

mod manager;
mod storage;
mod traits;

pub use manager::{CacheManager, DEFAULT_PREFIX, DEFAULT_TTL_MILLIS, DEFAULT_VERSION};
pub use storage::{KeyValueStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheStat, Clock, ManualClock, SystemClock};
