//! TTL-bounded, versioned cache over a key/value storage backend.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::KeyValueStorage;
use super::traits::{CacheEntry, CacheStat, Clock, SystemClock};

/// Namespace prefix for every key this cache owns.
pub const DEFAULT_PREFIX: &str = "medportal_cache_";

/// One hour.
pub const DEFAULT_TTL_MILLIS: i64 = 60 * 60 * 1000;

/// Current schema version of cached payloads.
pub const DEFAULT_VERSION: u32 = 1;

/// Local cache for whole collections, keyed by logical type name.
///
/// Caching is best-effort: storage failures, serialization failures and
/// corrupt entries are logged and behave like a miss. Nothing here returns an
/// error to the caller.
pub struct CacheManager {
  storage: Arc<dyn KeyValueStorage>,
  clock: Arc<dyn Clock>,
  prefix: String,
  ttl_millis: i64,
  version: u32,
}

impl CacheManager {
  /// Create a cache with the default prefix, TTL and schema version.
  pub fn new(storage: impl KeyValueStorage + 'static) -> Self {
    Self::with_shared_storage(Arc::new(storage))
  }

  pub fn with_shared_storage(storage: Arc<dyn KeyValueStorage>) -> Self {
    Self {
      storage,
      clock: Arc::new(SystemClock),
      prefix: DEFAULT_PREFIX.to_string(),
      ttl_millis: DEFAULT_TTL_MILLIS,
      version: DEFAULT_VERSION,
    }
  }

  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  pub fn with_ttl_millis(mut self, ttl_millis: i64) -> Self {
    self.ttl_millis = ttl_millis;
    self
  }

  pub fn with_version(mut self, version: u32) -> Self {
    self.version = version;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn ttl_millis(&self) -> i64 {
    self.ttl_millis
  }

  pub fn version(&self) -> u32 {
    self.version
  }

  /// Storage key for a logical type.
  pub fn key(&self, type_name: &str) -> String {
    format!("{}{}", self.prefix, type_name)
  }

  fn read_raw(&self, key: &str) -> Option<String> {
    match self.storage.get(key) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(%key, error = %e, "cache read failed");
        None
      }
    }
  }

  fn remove_key(&self, key: &str) {
    if let Err(e) = self.storage.remove(key) {
      warn!(%key, error = %e, "cache remove failed");
    }
  }

  /// Check whether the entry for `type_name` is present, current-version and
  /// within TTL. Invalid entries are deleted as part of the check.
  pub fn is_valid(&self, type_name: &str) -> bool {
    let key = self.key(type_name);
    let Some(raw) = self.read_raw(&key) else {
      return false;
    };

    let entry: CacheEntry<Value> = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(%key, error = %e, "corrupt cache entry, evicting");
        self.remove_key(&key);
        return false;
      }
    };

    let now = self.clock.now_millis();
    if entry.is_valid(now, self.ttl_millis, self.version) {
      return true;
    }

    debug!(
      %key,
      age_ms = entry.age_millis(now),
      version = entry.version,
      "evicting stale cache entry"
    );
    self.remove_key(&key);
    false
  }

  /// Stored payload for `type_name`, regardless of expiry.
  pub fn get<T: DeserializeOwned>(&self, type_name: &str) -> Option<T> {
    self.get_entry(type_name).map(|entry| entry.data)
  }

  /// Stored payload for `type_name`, only if the entry is still valid.
  pub fn get_fresh<T: DeserializeOwned>(&self, type_name: &str) -> Option<T> {
    if self.is_valid(type_name) {
      self.get(type_name)
    } else {
      None
    }
  }

  /// Full stored entry for `type_name`, regardless of expiry.
  pub fn get_entry<T: DeserializeOwned>(&self, type_name: &str) -> Option<CacheEntry<T>> {
    let key = self.key(type_name);
    let raw = self.read_raw(&key)?;
    match serde_json::from_str(&raw) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(%key, error = %e, "unreadable cache entry");
        None
      }
    }
  }

  /// Replace the entry for `type_name` with `data`, stamped now.
  pub fn set<T: Serialize + ?Sized>(&self, type_name: &str, data: &T) {
    let key = self.key(type_name);
    let entry = CacheEntry::new(data, self.clock.now_millis(), self.version);

    let raw = match serde_json::to_string(&entry) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(%key, error = %e, "failed to serialize cache entry");
        return;
      }
    };

    match self.storage.set(&key, &raw) {
      Ok(()) => debug!(%key, bytes = raw.len(), "cache write"),
      Err(e) => warn!(%key, error = %e, "cache write failed"),
    }
  }

  /// Remove the entry for `type_name`.
  pub fn clear(&self, type_name: &str) {
    self.remove_key(&self.key(type_name));
  }

  /// Remove every entry under this cache's prefix.
  pub fn clear_all(&self) {
    for key in self.owned_keys() {
      self.remove_key(&key);
    }
  }

  fn owned_keys(&self) -> Vec<String> {
    match self.storage.keys() {
      Ok(keys) => keys
        .into_iter()
        .filter(|k| k.starts_with(&self.prefix))
        .collect(),
      Err(e) => {
        warn!(error = %e, "failed to list cache keys");
        Vec::new()
      }
    }
  }

  /// Size, age and validity of every entry under the prefix. Read-only: unlike
  /// `is_valid`, this never evicts.
  pub fn stats(&self) -> Vec<CacheStat> {
    let now = self.clock.now_millis();

    self
      .owned_keys()
      .into_iter()
      .filter_map(|key| {
        let raw = self.read_raw(&key)?;
        let type_name = key[self.prefix.len()..].to_string();
        let entry = serde_json::from_str::<CacheEntry<Value>>(&raw).ok();

        Some(CacheStat {
          type_name,
          size_bytes: raw.len(),
          age_millis: entry.as_ref().map(|e| e.age_millis(now)),
          version: entry.as_ref().map(|e| e.version),
          valid: entry
            .as_ref()
            .is_some_and(|e| e.is_valid(now, self.ttl_millis, self.version)),
        })
      })
      .collect()
  }
}

impl Clone for CacheManager {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
      prefix: self.prefix.clone(),
      ttl_millis: self.ttl_millis,
      version: self.version,
    }
  }
}
