//! Live mirroring of remote collections into observable local state.
//!
//! One generic [`CollectionSync`] replaces per-entity subscription code. An
//! [`Entity`] supplies the query, the cache key and the projection from a
//! remote document to a typed record; the sync instance takes care of
//! write-through caching, offline fallback, guarded mutations and
//! reconciliation of records created while offline.

mod collection;
mod record;
mod state;

pub use collection::CollectionSync;
pub use record::{RecordId, LOCAL_ID_PREFIX};
pub use state::SyncState;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

use crate::store::{Document, Fields, Query, StoreError};

/// What a sync instance does with create/update/delete while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineWritePolicy {
  /// Refuse with [`SyncError::Offline`]; nothing changes
  Reject,
  /// Apply to local state with a pending-local id, replay on reconnect
  LocalOnly,
}

/// Whether expired cache entries may be served as the offline fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
  /// Serve whatever was last cached, however old
  #[default]
  ServeStale,
  /// Never serve entries past their TTL
  FreshOnly,
}

/// A typed view over one remote collection.
pub trait Entity: Send + Sync + 'static {
  type Record: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

  /// Logical type name used as the cache key
  const CACHE_TYPE: &'static str;

  fn query() -> Query;

  /// Project a remote document onto a record. Must be total: missing or
  /// mistyped fields take defaults.
  fn from_document(doc: &Document) -> Self::Record;

  /// Fields written to the store for `record`. The id is not included.
  fn to_fields(record: &Self::Record) -> Fields;

  fn id(record: &Self::Record) -> &RecordId;

  fn set_id(record: &mut Self::Record, id: RecordId);

  fn offline_policy() -> OfflineWritePolicy {
    OfflineWritePolicy::Reject
  }

  /// Drop repeated ids from snapshots, keeping the first occurrence.
  fn dedup() -> bool {
    false
  }

  /// Run a one-shot existence check before subscribing. An empty collection
  /// is served the fallback until documents appear.
  fn probe_before_subscribe() -> bool {
    false
  }

  /// Records served when neither the store nor the cache has anything.
  fn fallback() -> Vec<Self::Record> {
    Vec::new()
  }
}

/// Errors surfaced to callers of the sync mutations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
  #[error("{collection} is offline; change was not sent")]
  Offline { collection: String },
  #[error("record {0} not found")]
  NotFound(RecordId),
  #[error("sync for {0} has been unmounted")]
  Unmounted(String),
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Per-instance options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
  pub stale_policy: StalePolicy,
}
