//! In-process document store with live snapshots and fault injection.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{Direction, Document, DocumentStore, Fields, Query, Snapshot, StoreError, Subscription};

struct Watcher {
  query: Query,
  tx: mpsc::UnboundedSender<Result<Snapshot, StoreError>>,
}

#[derive(Default)]
struct Inner {
  /// Documents per collection, in insertion order
  collections: HashMap<String, Vec<Document>>,
  watchers: Vec<Watcher>,
  unavailable: Option<String>,
  write_failure: Option<StoreError>,
  next_id: u64,
  writes: u64,
}

impl Inner {
  fn run_query(&self, query: &Query) -> Vec<Document> {
    let mut docs = self
      .collections
      .get(&query.collection)
      .cloned()
      .unwrap_or_default();

    if let Some((field, direction)) = &query.order_by {
      // Stable sort keeps insertion order for equal keys
      docs.sort_by(|a, b| {
        let ord = compare_values(a.fields.get(field), b.fields.get(field));
        match direction {
          Direction::Ascending => ord,
          Direction::Descending => ord.reverse(),
        }
      });
    }

    if let Some(limit) = query.limit {
      docs.truncate(limit);
    }
    docs
  }

  fn check_available(&self) -> Result<(), StoreError> {
    match &self.unavailable {
      Some(reason) => Err(StoreError::Unavailable(reason.clone())),
      None => Ok(()),
    }
  }

  fn begin_write(&mut self) -> Result<(), StoreError> {
    self.check_available()?;
    if let Some(err) = self.write_failure.take() {
      return Err(err);
    }
    self.writes += 1;
    Ok(())
  }

  /// Push a fresh snapshot to every live watcher of `collection`, dropping
  /// watchers whose stream has gone away.
  fn notify(&mut self, collection: &str) {
    let mut watchers = std::mem::take(&mut self.watchers);
    watchers.retain(|w| !w.tx.is_closed());
    for watcher in &watchers {
      if watcher.query.collection == collection {
        let snapshot = Snapshot {
          documents: self.run_query(&watcher.query),
        };
        let _ = watcher.tx.unbounded_send(Ok(snapshot));
      }
    }
    self.watchers = watchers;
  }
}

/// Document store held entirely in memory.
///
/// Behaves like the hosted store from the sync layer's point of view: live
/// subscriptions receive a full snapshot after every write to their
/// collection, and going unavailable terminates every live subscription with
/// an error.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    // A panic while holding the lock leaves plain data behind; keep serving it.
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Insert a document with a fixed id, without counting it as a client write.
  /// Duplicate ids are kept, which lets tests reproduce queries that return
  /// the same logical document twice.
  pub fn insert(&self, collection: &str, id: &str, fields: Fields) {
    let mut inner = self.lock();
    inner
      .collections
      .entry(collection.to_string())
      .or_default()
      .push(Document::new(id, fields));
    inner.notify(collection);
  }

  /// Simulate losing (or regaining) the connection.
  pub fn set_available(&self, available: bool) {
    let mut inner = self.lock();
    if available {
      inner.unavailable = None;
      return;
    }

    let reason = "connection lost".to_string();
    for watcher in inner.watchers.drain(..) {
      let _ = watcher
        .tx
        .unbounded_send(Err(StoreError::Unavailable(reason.clone())));
    }
    inner.unavailable = Some(reason);
  }

  /// Make the next write fail with `err`.
  pub fn fail_next_write(&self, err: StoreError) {
    self.lock().write_failure = Some(err);
  }

  /// Number of client writes that reached the store.
  pub fn write_count(&self) -> u64 {
    self.lock().writes
  }

  /// Live subscriptions still attached.
  pub fn watcher_count(&self) -> usize {
    let mut inner = self.lock();
    inner.watchers.retain(|w| !w.tx.is_closed());
    inner.watchers.len()
  }

  pub fn documents(&self, collection: &str) -> Vec<Document> {
    self
      .lock()
      .collections
      .get(collection)
      .cloned()
      .unwrap_or_default()
  }
}

#[async_trait]
impl DocumentStore for MemoryStore {
  async fn subscribe(&self, query: &Query) -> Result<Subscription, StoreError> {
    let mut inner = self.lock();
    inner.check_available()?;

    let (tx, rx) = mpsc::unbounded();
    let initial = Snapshot {
      documents: inner.run_query(query),
    };
    let _ = tx.unbounded_send(Ok(initial));
    inner.watchers.push(Watcher {
      query: query.clone(),
      tx,
    });
    debug!(collection = %query.collection, "subscription opened");

    Ok(rx.boxed())
  }

  async fn get_all(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
    let inner = self.lock();
    inner.check_available()?;
    Ok(inner.run_query(query))
  }

  async fn exists(&self, collection: &str) -> Result<bool, StoreError> {
    let inner = self.lock();
    inner.check_available()?;
    Ok(
      inner
        .collections
        .get(collection)
        .is_some_and(|docs| !docs.is_empty()),
    )
  }

  async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
    let mut inner = self.lock();
    inner.begin_write()?;

    inner.next_id += 1;
    let id = format!("doc-{}", inner.next_id);
    inner
      .collections
      .entry(collection.to_string())
      .or_default()
      .push(Document::new(id.clone(), fields));
    inner.notify(collection);

    Ok(id)
  }

  async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
    let mut inner = self.lock();
    inner.begin_write()?;

    let doc = inner
      .collections
      .get_mut(collection)
      .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
      .ok_or_else(|| StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
      })?;
    for (key, value) in fields {
      doc.fields.insert(key, value);
    }
    inner.notify(collection);

    Ok(())
  }

  async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
    let mut inner = self.lock();
    inner.begin_write()?;

    let docs = inner.collections.entry(collection.to_string()).or_default();
    let before = docs.len();
    docs.retain(|d| d.id != id);
    if docs.len() == before {
      return Err(StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
      });
    }
    inner.notify(collection);

    Ok(())
  }
}

/// Ordering for query sorting: missing < bool < number < string, others equal.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
  fn rank(v: Option<&Value>) -> u8 {
    match v {
      None | Some(Value::Null) => 0,
      Some(Value::Bool(_)) => 1,
      Some(Value::Number(_)) => 2,
      Some(Value::String(_)) => 3,
      Some(_) => 4,
    }
  }

  match (a, b) {
    (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
    (Some(Value::Number(x)), Some(Value::Number(y))) => {
      let x = x.as_f64().unwrap_or(0.0);
      let y = y.as_f64().unwrap_or(0.0);
      x.partial_cmp(&y).unwrap_or(Ordering::Equal)
    }
    (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
    _ => rank(a).cmp(&rank(b)),
  }
}
