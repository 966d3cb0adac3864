//! Core traits and types for the local cache.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of "now" for cache timestamps, in epoch milliseconds.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

/// Clock that only moves when told to. Used to pin TTL boundaries in tests
/// and in the demo command.
#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicI64,
}

impl ManualClock {
  pub fn new(start_millis: i64) -> Self {
    Self {
      now: AtomicI64::new(start_millis),
    }
  }

  pub fn set(&self, millis: i64) {
    self.now.store(millis, Ordering::SeqCst);
  }

  pub fn advance(&self, millis: i64) {
    self.now.fetch_add(millis, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_millis(&self) -> i64 {
    self.now.load(Ordering::SeqCst)
  }
}

/// One persisted cache entry. The whole collection for a logical type is
/// stored as a single entry and replaced wholesale on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  /// Epoch milliseconds at write time
  pub timestamp: i64,
  /// Schema version the entry was written with
  pub version: u32,
}

impl<T> CacheEntry<T> {
  pub fn new(data: T, timestamp: i64, version: u32) -> Self {
    Self {
      data,
      timestamp,
      version,
    }
  }

  pub fn age_millis(&self, now: i64) -> i64 {
    now - self.timestamp
  }

  /// An entry is valid when its version matches and it is no older than `ttl_millis`.
  pub fn is_valid(&self, now: i64, ttl_millis: i64, version: u32) -> bool {
    self.version == version && self.age_millis(now) <= ttl_millis
  }
}

/// Diagnostic view of a single cached type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStat {
  /// Logical type name, without the namespace prefix
  pub type_name: String,
  /// Size of the stored value in bytes
  pub size_bytes: usize,
  /// Age in milliseconds (None when the entry is unreadable)
  pub age_millis: Option<i64>,
  pub version: Option<u32>,
  pub valid: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entry_validity_window() {
    let entry = CacheEntry::new(vec![1, 2, 3], 0, 1);
    assert!(entry.is_valid(3_599_999, 3_600_000, 1));
    assert!(entry.is_valid(3_600_000, 3_600_000, 1));
    assert!(!entry.is_valid(3_600_001, 3_600_000, 1));
  }

  #[test]
  fn test_entry_version_mismatch() {
    let entry = CacheEntry::new("x", 0, 1);
    assert!(!entry.is_valid(0, 3_600_000, 2));
  }

  #[test]
  fn test_entry_json_layout() {
    let entry = CacheEntry::new(vec!["a"], 42, 1);
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json, serde_json::json!({"data": ["a"], "timestamp": 42, "version": 1}));
  }

  #[test]
  fn test_manual_clock() {
    let clock = ManualClock::new(10);
    clock.advance(5);
    assert_eq!(clock.now_millis(), 15);
    clock.set(100);
    assert_eq!(clock.now_millis(), 100);
  }
}
