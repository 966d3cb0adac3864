//! Record identity: persisted in the store, or created locally while offline.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix that marks an id as generated locally and not yet persisted.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Identity of a record.
///
/// Serializes as a plain string; pending-local ids carry [`LOCAL_ID_PREFIX`]
/// so the distinction survives a trip through the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordId {
  Persisted(String),
  PendingLocal(String),
}

impl RecordId {
  /// Fresh pending-local id.
  pub fn new_local() -> Self {
    Self::PendingLocal(format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4()))
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Persisted(id) | Self::PendingLocal(id) => id,
    }
  }

  pub fn is_pending(&self) -> bool {
    matches!(self, Self::PendingLocal(_))
  }
}

impl Default for RecordId {
  fn default() -> Self {
    Self::Persisted(String::new())
  }
}

impl From<String> for RecordId {
  fn from(id: String) -> Self {
    if id.starts_with(LOCAL_ID_PREFIX) {
      Self::PendingLocal(id)
    } else {
      Self::Persisted(id)
    }
  }
}

impl From<&str> for RecordId {
  fn from(id: &str) -> Self {
    Self::from(id.to_string())
  }
}

impl From<RecordId> for String {
  fn from(id: RecordId) -> Self {
    match id {
      RecordId::Persisted(id) | RecordId::PendingLocal(id) => id,
    }
  }
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
