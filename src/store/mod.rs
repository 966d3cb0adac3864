//! Remote document store collaborator.
//!
//! The sync layer only needs a live subscription, one-shot reads and
//! create/update/delete keyed by collection and document id. Everything is
//! async and fallible; consistency is owned by the store.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

/// Loosely typed document body, as delivered by the store.
pub type Fields = Map<String, Value>;

/// A single remote document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
  pub id: String,
  pub fields: Fields,
}

impl Document {
  pub fn new(id: impl Into<String>, fields: Fields) -> Self {
    Self {
      id: id.into(),
      fields,
    }
  }
}

/// Full contents of a query result at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
  pub documents: Vec<Document>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Ascending,
  Descending,
}

/// Query descriptor: collection plus optional ordering and limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
  pub collection: String,
  pub order_by: Option<(String, Direction)>,
  pub limit: Option<usize>,
}

impl Query {
  pub fn collection(name: impl Into<String>) -> Self {
    Self {
      collection: name.into(),
      order_by: None,
      limit: None,
    }
  }

  pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
    self.order_by = Some((field.into(), direction));
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}

/// Errors reported by the remote store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
  #[error("remote store unavailable: {0}")]
  Unavailable(String),
  #[error("permission denied: {0}")]
  PermissionDenied(String),
  #[error("request blocked by client: {0}")]
  Blocked(String),
  #[error("document {collection}/{id} not found")]
  NotFound { collection: String, id: String },
  #[error("remote store error: {0}")]
  Other(String),
}

impl StoreError {
  /// Transient errors put the sync layer into offline mode instead of
  /// surfacing to the user.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Self::Unavailable(_) | Self::PermissionDenied(_) | Self::Blocked(_)
    )
  }
}

/// Live query results. Dropping the stream unsubscribes.
pub type Subscription = BoxStream<'static, Result<Snapshot, StoreError>>;

/// Operations the sync layer consumes from the remote document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  /// Open a live subscription. The first item is the current result set.
  async fn subscribe(&self, query: &Query) -> Result<Subscription, StoreError>;

  /// One-shot read of a query.
  async fn get_all(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

  /// Whether the collection has any documents.
  async fn exists(&self, collection: &str) -> Result<bool, StoreError>;

  /// Create a document and return its store-assigned id.
  async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

  /// Merge `fields` into an existing document.
  async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

  async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;
}
