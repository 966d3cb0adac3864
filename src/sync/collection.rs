//! Generic live-subscription component with write-through caching.

use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::SyncState;
use super::{Entity, OfflineWritePolicy, RecordId, StalePolicy, SyncError, SyncOptions};
use crate::cache::CacheManager;
use crate::connectivity::{ConnectionStatus, ConnectivityMonitor};
use crate::store::{DocumentStore, Snapshot, StoreError};

/// Suffix of the cache entry holding records not yet written to the store.
/// Only expiry-agnostic reads touch it, so TTL eviction never drops them.
const PENDING_SUFFIX: &str = "_pending";

/// Why an attached subscription stopped.
enum Detach {
  /// The shared monitor reported the store as unreachable
  Degraded,
  /// The subscription (or the probe before it) failed
  Failed(StoreError),
}

struct Shared<E: Entity> {
  store: Arc<dyn DocumentStore>,
  cache: CacheManager,
  monitor: ConnectivityMonitor,
  options: SyncOptions,
  state: watch::Sender<SyncState<E::Record>>,
  mounted: AtomicBool,
  /// Pending-local records must be replayed before the next snapshot is applied
  needs_reconcile: AtomicBool,
  /// Held by every mutation and by snapshot application, so local writes
  /// cannot interleave with a replay
  writes: tokio::sync::Mutex<()>,
  /// Local ids already replayed, mapped to the ids the store assigned
  replayed: Mutex<HashMap<RecordId, RecordId>>,
  _entity: PhantomData<fn() -> E>,
}

/// Mirrors the remote collection of `E` into observable local state.
///
/// Mounting spawns one task that owns the live subscription and applies
/// snapshots sequentially. Dropping or [`unmount`](Self::unmount)ing cancels
/// the task and releases the subscription; nothing touches state afterwards.
pub struct CollectionSync<E: Entity> {
  shared: Arc<Shared<E>>,
  task: Option<JoinHandle<()>>,
}

impl<E: Entity> CollectionSync<E> {
  /// Mount with default options. Must be called inside a Tokio runtime.
  pub fn mount(
    store: Arc<dyn DocumentStore>,
    cache: CacheManager,
    monitor: ConnectivityMonitor,
  ) -> Self {
    Self::mount_with(store, cache, monitor, SyncOptions::default())
  }

  pub fn mount_with(
    store: Arc<dyn DocumentStore>,
    cache: CacheManager,
    monitor: ConnectivityMonitor,
    options: SyncOptions,
  ) -> Self {
    let (state, _) = watch::channel(SyncState::default());
    let shared = Arc::new(Shared {
      store,
      cache,
      monitor,
      options,
      state,
      mounted: AtomicBool::new(true),
      needs_reconcile: AtomicBool::new(true),
      writes: tokio::sync::Mutex::new(()),
      replayed: Mutex::new(HashMap::new()),
      _entity: PhantomData,
    });

    debug!(collection = E::CACHE_TYPE, "mounting sync");
    let task = tokio::spawn(run(Arc::clone(&shared)));

    Self {
      shared,
      task: Some(task),
    }
  }

  /// Current state.
  pub fn state(&self) -> SyncState<E::Record> {
    self.shared.state.borrow().clone()
  }

  /// Listener that wakes on every state change.
  pub fn watch(&self) -> watch::Receiver<SyncState<E::Record>> {
    self.shared.state.subscribe()
  }

  pub fn records(&self) -> Vec<E::Record> {
    self.shared.state.borrow().records.clone()
  }

  pub fn is_offline(&self) -> bool {
    self.shared.state.borrow().offline
  }

  /// Ask every sync instance sharing the monitor to retry the remote store.
  pub fn retry(&self) -> bool {
    info!(collection = E::CACHE_TYPE, "retry requested");
    self.shared.monitor.request_retry()
  }

  /// Create a record. Returns its id: persisted when online, pending-local
  /// when offline under [`OfflineWritePolicy::LocalOnly`].
  pub async fn create(&self, mut record: E::Record) -> Result<RecordId, SyncError> {
    let _writing = self.shared.writes.lock().await;
    self.shared.ensure_mounted()?;

    if self.is_offline() {
      return match E::offline_policy() {
        OfflineWritePolicy::Reject => Err(self.shared.offline_error()),
        OfflineWritePolicy::LocalOnly => {
          let id = RecordId::new_local();
          E::set_id(&mut record, id.clone());
          info!(collection = E::CACHE_TYPE, %id, "created local-only record");
          self.shared.commit(|records| records.push(record));
          Ok(id)
        }
      };
    }

    let id = self.shared.create_remote(&mut record).await?;
    self.shared.commit(|records| upsert::<E>(records, record));
    Ok(id)
  }

  /// Write `record` back, matching on its id. A pending-local id that has
  /// since been replayed is redirected to the persisted record.
  pub async fn update(&self, mut record: E::Record) -> Result<(), SyncError> {
    let _writing = self.shared.writes.lock().await;
    self.shared.ensure_mounted()?;
    if let Some(persisted) = self.shared.replayed_as(E::id(&record)) {
      E::set_id(&mut record, persisted);
    }
    let id = E::id(&record).clone();

    match &id {
      RecordId::PendingLocal(_) => {
        if !self.shared.contains(&id) {
          return Err(SyncError::NotFound(id.clone()));
        }
        if self.is_offline() {
          if E::offline_policy() == OfflineWritePolicy::Reject {
            return Err(self.shared.offline_error());
          }
          self.shared.commit(|records| upsert::<E>(records, record));
          return Ok(());
        }

        // Online: the record has never reached the store, so create it
        self.shared.create_remote(&mut record).await?;
        self.shared.commit(|records| {
          records.retain(|r| E::id(r) != &id);
          upsert::<E>(records, record);
        });
        Ok(())
      }
      RecordId::Persisted(remote_id) => {
        if self.is_offline() {
          return Err(self.shared.offline_error());
        }
        self
          .shared
          .store
          .update(&E::query().collection, remote_id, E::to_fields(&record))
          .await
          .map_err(|e| self.shared.surface(e))?;
        self.shared.commit(|records| upsert::<E>(records, record));
        Ok(())
      }
    }
  }

  pub async fn delete(&self, id: &RecordId) -> Result<(), SyncError> {
    let _writing = self.shared.writes.lock().await;
    self.shared.ensure_mounted()?;
    let id = &self.shared.replayed_as(id).unwrap_or_else(|| id.clone());

    match id {
      RecordId::PendingLocal(_) => {
        if !self.shared.contains(id) {
          return Err(SyncError::NotFound(id.clone()));
        }
        self.shared.commit(|records| records.retain(|r| E::id(r) != id));
        Ok(())
      }
      RecordId::Persisted(remote_id) => {
        if self.is_offline() {
          return Err(self.shared.offline_error());
        }
        self
          .shared
          .store
          .delete(&E::query().collection, remote_id)
          .await
          .map_err(|e| self.shared.surface(e))?;
        self.shared.commit(|records| records.retain(|r| E::id(r) != id));
        Ok(())
      }
    }
  }

  /// Tear down: cancel the subscription task and stop all state updates.
  pub fn unmount(&mut self) {
    self.shared.mounted.store(false, Ordering::SeqCst);
    if let Some(task) = self.task.take() {
      task.abort();
      debug!(collection = E::CACHE_TYPE, "unmounted sync");
    }
  }
}

impl<E: Entity> Drop for CollectionSync<E> {
  fn drop(&mut self) {
    self.unmount();
  }
}

impl<E: Entity> Shared<E> {
  fn is_mounted(&self) -> bool {
    self.mounted.load(Ordering::SeqCst)
  }

  fn ensure_mounted(&self) -> Result<(), SyncError> {
    if self.is_mounted() {
      Ok(())
    } else {
      Err(SyncError::Unmounted(E::CACHE_TYPE.to_string()))
    }
  }

  fn offline_error(&self) -> SyncError {
    info!(collection = E::CACHE_TYPE, "rejected write while offline");
    SyncError::Offline {
      collection: E::query().collection,
    }
  }

  fn current_records(&self) -> Vec<E::Record> {
    self.state.borrow().records.clone()
  }

  fn contains(&self, id: &RecordId) -> bool {
    self.state.borrow().records.iter().any(|r| E::id(r) == id)
  }

  /// Apply `f` to the state if still mounted.
  fn update_state(&self, f: impl FnOnce(&mut SyncState<E::Record>)) {
    if self.is_mounted() {
      self.state.send_modify(f);
    }
  }

  /// Change the records and write them through to the cache.
  fn commit(&self, f: impl FnOnce(&mut Vec<E::Record>)) {
    self.update_state(|state| {
      f(&mut state.records);
      self.write_through(&state.records);
    });
  }

  fn pending_type() -> String {
    format!("{}{}", E::CACHE_TYPE, PENDING_SUFFIX)
  }

  /// Cache `records`, keeping the pending-local ones under their own entry.
  fn write_through(&self, records: &[E::Record]) {
    self.cache.set(E::CACHE_TYPE, records);

    let pending: Vec<&E::Record> = records.iter().filter(|r| E::id(r).is_pending()).collect();
    if pending.is_empty() {
      self.cache.clear(&Self::pending_type());
    } else {
      self.cache.set(&Self::pending_type(), &pending);
    }
  }

  /// Pending-local records kept in the cache, whatever the age of the entry.
  fn stored_pending(&self) -> Vec<E::Record> {
    self.cache.get(&Self::pending_type()).unwrap_or_default()
  }

  fn replayed_as(&self, id: &RecordId) -> Option<RecordId> {
    self
      .replayed
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(id)
      .cloned()
  }

  async fn create_remote(&self, record: &mut E::Record) -> Result<RecordId, SyncError> {
    let collection = E::query().collection;
    let remote_id = self
      .store
      .create(&collection, E::to_fields(record))
      .await
      .map_err(|e| self.surface(e))?;

    let id = RecordId::Persisted(remote_id);
    E::set_id(record, id.clone());
    Ok(id)
  }

  /// Record a failed remote write on the state and convert it for the caller.
  fn surface(&self, err: StoreError) -> SyncError {
    warn!(collection = E::CACHE_TYPE, error = %err, "remote write failed");
    self.update_state(|state| state.error = Some(err.to_string()));
    SyncError::Store(err)
  }

  fn cached_records(&self) -> Option<Vec<E::Record>> {
    match self.options.stale_policy {
      StalePolicy::ServeStale => self.cache.get(E::CACHE_TYPE),
      StalePolicy::FreshOnly => self.cache.get_fresh(E::CACHE_TYPE),
    }
  }

  /// Switch to offline mode, serving cached records (or the fallback).
  fn serve_offline(&self) {
    if self.state.borrow().offline {
      return;
    }

    let cached = self.cached_records();
    let pending = self.stored_pending();
    debug!(
      collection = E::CACHE_TYPE,
      hit = cached.is_some(),
      pending = pending.len(),
      "serving offline"
    );

    self.update_state(|state| {
      match cached {
        Some(records) => state.records = records,
        None if state.records.is_empty() => state.records = E::fallback(),
        None => {}
      }
      for record in pending {
        if !state.records.iter().any(|r| E::id(r) == E::id(&record)) {
          state.records.push(record);
        }
      }
      state.loading = false;
      state.error = None;
      state.offline = true;
      state.status = ConnectionStatus::Offline;
    });
    self.needs_reconcile.store(true, Ordering::SeqCst);
  }

  /// Serve the fallback while the collection has no documents.
  fn serve_fallback(&self) {
    self.update_state(|state| {
      state.records = E::fallback();
      state.loading = false;
      state.error = None;
      state.offline = false;
      state.status = ConnectionStatus::Connected;
    });
  }

  fn fail(&self, err: &StoreError) {
    warn!(
      collection = E::CACHE_TYPE,
      error = %err,
      transient = err.is_transient(),
      "subscription failed, going offline"
    );
    self.monitor.mark_offline(&err.to_string());
    self.serve_offline();
  }

  /// Replay pending-local records as remote creates, in their original
  /// order. Records the store rejects stay pending.
  async fn reconcile(&self) -> Replay<E::Record> {
    let mut pending = pending_only::<E>(self.current_records());
    if pending.is_empty() {
      pending = self.stored_pending();
    }

    let mut replay = Replay::default();
    if pending.is_empty() {
      return replay;
    }

    info!(
      collection = E::CACHE_TYPE,
      count = pending.len(),
      "replaying local-only records"
    );

    for mut record in pending {
      let local_id = E::id(&record).clone();
      match self.create_remote(&mut record).await {
        Ok(id) => {
          debug!(%local_id, %id, "local record persisted");
          self
            .replayed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(local_id, id);
          replay.persisted.push(record);
        }
        Err(_) => replay.pending.push(record),
      }
    }
    replay
  }

  async fn apply_snapshot(&self, snapshot: Snapshot) {
    let _writing = self.writes.lock().await;

    let replay = if self.needs_reconcile.swap(false, Ordering::SeqCst) {
      self.reconcile().await
    } else {
      Replay {
        persisted: Vec::new(),
        pending: pending_only::<E>(self.current_records()),
      }
    };

    if snapshot.documents.is_empty() && E::probe_before_subscribe() && replay.is_empty() {
      self.serve_fallback();
      self.monitor.confirm_connected();
      return;
    }

    let mut records: Vec<E::Record> = snapshot.documents.iter().map(E::from_document).collect();
    if E::dedup() {
      let mut seen = HashSet::new();
      records.retain(|r| seen.insert(E::id(r).clone()));
    }
    // Replayed records show under their new ids until a snapshot includes them
    for record in replay.persisted {
      upsert::<E>(&mut records, record);
    }
    records.extend(replay.pending);

    debug!(
      collection = E::CACHE_TYPE,
      count = records.len(),
      "applying snapshot"
    );

    self.update_state(|state| {
      state.records = records;
      self.write_through(&state.records);
      state.loading = false;
      state.error = None;
      state.offline = false;
      state.status = ConnectionStatus::Connected;
    });
    self.monitor.confirm_connected();
  }

  /// Probe (if the entity asks for it), subscribe, and apply snapshots until
  /// the subscription fails or the monitor reports the store degraded.
  async fn attach(&self, connectivity: &mut watch::Receiver<ConnectionStatus>) -> Option<Detach> {
    let query = E::query();

    if E::probe_before_subscribe() {
      match self.store.exists(&query.collection).await {
        Ok(true) => {}
        Ok(false) => {
          debug!(collection = %query.collection, "collection empty, serving fallback");
          self.serve_fallback();
        }
        Err(e) => return Some(Detach::Failed(e)),
      }
    }

    let mut subscription = match self.store.subscribe(&query).await {
      Ok(subscription) => subscription,
      Err(e) => return Some(Detach::Failed(e)),
    };

    loop {
      tokio::select! {
        event = subscription.next() => match event {
          Some(Ok(snapshot)) => self.apply_snapshot(snapshot).await,
          Some(Err(e)) => return Some(Detach::Failed(e)),
          None => {
            return Some(Detach::Failed(StoreError::Unavailable(
              "subscription closed".to_string(),
            )))
          }
        },
        changed = connectivity.changed() => {
          if changed.is_err() {
            return None;
          }
          let status = *connectivity.borrow_and_update();
          if status == ConnectionStatus::Offline {
            return Some(Detach::Degraded);
          }
        }
      }
    }
  }
}

/// Wait until the monitor leaves the offline state. False if it went away.
async fn wait_for_reconnect(connectivity: &mut watch::Receiver<ConnectionStatus>) -> bool {
  loop {
    if connectivity.changed().await.is_err() {
      return false;
    }
    let status = *connectivity.borrow_and_update();
    if status != ConnectionStatus::Offline {
      return true;
    }
  }
}

async fn run<E: Entity>(shared: Arc<Shared<E>>) {
  let mut connectivity = shared.monitor.subscribe();

  while shared.is_mounted() {
    let status = *connectivity.borrow_and_update();
    if status == ConnectionStatus::Offline {
      shared.serve_offline();
      if !wait_for_reconnect(&mut connectivity).await {
        break;
      }
      continue;
    }

    match shared.attach(&mut connectivity).await {
      Some(Detach::Failed(err)) => shared.fail(&err),
      Some(Detach::Degraded) => shared.serve_offline(),
      None => break,
    }
  }
}

struct Replay<R> {
  /// Now in the store, carrying their persisted ids
  persisted: Vec<R>,
  /// Still local-only
  pending: Vec<R>,
}

impl<R> Default for Replay<R> {
  fn default() -> Self {
    Self {
      persisted: Vec::new(),
      pending: Vec::new(),
    }
  }
}

impl<R> Replay<R> {
  fn is_empty(&self) -> bool {
    self.persisted.is_empty() && self.pending.is_empty()
  }
}

fn pending_only<E: Entity>(records: Vec<E::Record>) -> Vec<E::Record> {
  records
    .into_iter()
    .filter(|r| E::id(r).is_pending())
    .collect()
}

/// Replace the record with the same id, or append it.
fn upsert<E: Entity>(records: &mut Vec<E::Record>, record: E::Record) {
  match records.iter_mut().find(|r| E::id(r) == E::id(&record)) {
    Some(existing) => *existing = record,
    None => records.push(record),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ManualClock, MemoryStorage};
  use crate::store::{Direction, Document, Fields, MemoryStore, Query, Subscription};
  use async_trait::async_trait;
  use serde::{Deserialize, Serialize};
  use serde_json::json;
  use std::time::Duration;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Note {
    id: RecordId,
    title: String,
    created_at: i64,
  }

  struct Notes;

  impl Entity for Notes {
    type Record = Note;
    const CACHE_TYPE: &'static str = "notes";

    fn query() -> Query {
      Query::collection("notes").order_by("createdAt", Direction::Descending)
    }

    fn from_document(doc: &Document) -> Note {
      Note {
        id: RecordId::from(doc.id.as_str()),
        title: doc
          .fields
          .get("title")
          .and_then(|v| v.as_str())
          .unwrap_or_default()
          .to_string(),
        created_at: doc
          .fields
          .get("createdAt")
          .and_then(|v| v.as_i64())
          .unwrap_or_default(),
      }
    }

    fn to_fields(record: &Note) -> Fields {
      let mut fields = Fields::new();
      fields.insert("title".into(), json!(record.title));
      fields.insert("createdAt".into(), json!(record.created_at));
      fields
    }

    fn id(record: &Note) -> &RecordId {
      &record.id
    }

    fn set_id(record: &mut Note, id: RecordId) {
      record.id = id;
    }
  }

  /// Same collection, but offline writes are kept locally and ids deduplicated.
  struct Drafts;

  impl Entity for Drafts {
    type Record = Note;
    const CACHE_TYPE: &'static str = "drafts";

    fn query() -> Query {
      Query::collection("drafts")
    }

    fn from_document(doc: &Document) -> Note {
      Notes::from_document(doc)
    }

    fn to_fields(record: &Note) -> Fields {
      Notes::to_fields(record)
    }

    fn id(record: &Note) -> &RecordId {
      &record.id
    }

    fn set_id(record: &mut Note, id: RecordId) {
      record.id = id;
    }

    fn offline_policy() -> OfflineWritePolicy {
      OfflineWritePolicy::LocalOnly
    }

    fn dedup() -> bool {
      true
    }
  }

  /// Probing entity with a fixture fallback.
  struct Pinned;

  impl Entity for Pinned {
    type Record = Note;
    const CACHE_TYPE: &'static str = "pinned";

    fn query() -> Query {
      Query::collection("pinned")
    }

    fn from_document(doc: &Document) -> Note {
      Notes::from_document(doc)
    }

    fn to_fields(record: &Note) -> Fields {
      Notes::to_fields(record)
    }

    fn id(record: &Note) -> &RecordId {
      &record.id
    }

    fn set_id(record: &mut Note, id: RecordId) {
      record.id = id;
    }

    fn probe_before_subscribe() -> bool {
      true
    }

    fn fallback() -> Vec<Note> {
      vec![note("fixture", "Welcome", 0)]
    }
  }

  fn note(id: &str, title: &str, created_at: i64) -> Note {
    Note {
      id: RecordId::from(id),
      title: title.to_string(),
      created_at,
    }
  }

  fn fields(title: &str, created_at: i64) -> Fields {
    json!({"title": title, "createdAt": created_at})
      .as_object()
      .cloned()
      .unwrap()
  }

  /// Memory store whose creates take a while to be acknowledged.
  struct SlowCreates {
    inner: MemoryStore,
    delay: Duration,
  }

  #[async_trait]
  impl DocumentStore for SlowCreates {
    async fn subscribe(&self, query: &Query) -> Result<Subscription, StoreError> {
      self.inner.subscribe(query).await
    }

    async fn get_all(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
      self.inner.get_all(query).await
    }

    async fn exists(&self, collection: &str) -> Result<bool, StoreError> {
      self.inner.exists(collection).await
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
      tokio::time::sleep(self.delay).await;
      self.inner.create(collection, fields).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
      self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
      self.inner.delete(collection, id).await
    }
  }

  struct Harness {
    store: MemoryStore,
    cache: CacheManager,
    monitor: ConnectivityMonitor,
  }

  impl Harness {
    fn new() -> Self {
      Self {
        store: MemoryStore::new(),
        cache: CacheManager::new(MemoryStorage::new()),
        monitor: ConnectivityMonitor::new(),
      }
    }

    fn mount<E: Entity>(&self) -> CollectionSync<E> {
      self.mount_with(SyncOptions::default())
    }

    fn mount_with<E: Entity>(&self, options: SyncOptions) -> CollectionSync<E> {
      CollectionSync::mount_with(
        Arc::new(self.store.clone()),
        self.cache.clone(),
        self.monitor.clone(),
        options,
      )
    }
  }

  async fn wait_until<E: Entity>(
    sync: &CollectionSync<E>,
    pred: impl Fn(&SyncState<E::Record>) -> bool,
  ) -> SyncState<E::Record> {
    let mut rx = sync.watch();
    let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| pred(s)))
      .await
      .expect("timed out waiting for state")
      .expect("state sender dropped")
      .clone();
    state
  }

  fn titles(records: &[Note]) -> Vec<&str> {
    records.iter().map(|n| n.title.as_str()).collect()
  }

  #[tokio::test]
  async fn test_initial_state_is_loading() {
    let h = Harness::new();
    let sync = h.mount::<Notes>();
    let state = sync.state();
    assert!(state.loading);
    assert!(state.records.is_empty());
  }

  #[tokio::test]
  async fn test_snapshot_replaces_records_in_server_order() {
    let h = Harness::new();
    h.store.insert("notes", "a", fields("A", 1));
    h.store.insert("notes", "b", fields("B", 3));
    h.store.insert("notes", "c", fields("C", 2));

    let sync = h.mount::<Notes>();
    let state = wait_until(&sync, |s| !s.loading).await;

    assert_eq!(titles(&state.records), vec!["B", "C", "A"]);
    assert!(state.is_connected());
    assert!(!state.offline);
    assert_eq!(h.monitor.status(), ConnectionStatus::Connected);
    assert_eq!(h.cache.get::<Vec<Note>>("notes"), Some(state.records));

    // Later snapshots replace wholesale
    h.store.delete("notes", "b").await.unwrap();
    let state = wait_until(&sync, |s| s.records.len() == 2).await;
    assert_eq!(titles(&state.records), vec!["C", "A"]);
  }

  #[tokio::test]
  async fn test_dedup_keeps_first_occurrence() {
    let h = Harness::new();
    h.store.insert("drafts", "x", fields("first", 1));
    h.store.insert("drafts", "x", fields("second", 2));
    h.store.insert("drafts", "y", fields("other", 3));

    let sync = h.mount::<Drafts>();
    let state = wait_until(&sync, |s| !s.loading).await;
    assert_eq!(titles(&state.records), vec!["first", "other"]);
  }

  #[tokio::test]
  async fn test_subscription_error_serves_cache() {
    let h = Harness::new();
    h.cache.set("notes", &vec![note("a", "cached", 1)]);
    h.store.set_available(false);

    let sync = h.mount::<Notes>();
    let state = wait_until(&sync, |s| !s.loading).await;

    assert!(state.offline);
    assert_eq!(state.status, ConnectionStatus::Offline);
    assert_eq!(state.error, None);
    assert_eq!(titles(&state.records), vec!["cached"]);
    assert!(h.monitor.is_degraded());
  }

  #[tokio::test]
  async fn test_subscription_error_without_cache_serves_fallback() {
    let h = Harness::new();
    h.store.set_available(false);

    let notes = h.mount::<Notes>();
    let state = wait_until(&notes, |s| !s.loading).await;
    assert!(state.offline);
    assert!(state.records.is_empty());

    let pinned = h.mount::<Pinned>();
    let state = wait_until(&pinned, |s| !s.loading).await;
    assert!(state.offline);
    assert_eq!(titles(&state.records), vec!["Welcome"]);
  }

  #[tokio::test]
  async fn test_fresh_only_policy_ignores_expired_cache() {
    let mut h = Harness::new();
    let clock = Arc::new(ManualClock::new(0));
    h.cache = CacheManager::new(MemoryStorage::new()).with_clock(clock.clone());
    h.cache.set("notes", &vec![note("a", "old", 1)]);
    clock.advance(h.cache.ttl_millis() + 1);
    h.store.set_available(false);

    let sync = h.mount_with::<Notes>(SyncOptions {
      stale_policy: StalePolicy::FreshOnly,
    });
    let state = wait_until(&sync, |s| !s.loading).await;
    assert!(state.offline);
    assert!(state.records.is_empty());
  }

  #[tokio::test]
  async fn test_connection_loss_mid_session_keeps_last_snapshot() {
    let h = Harness::new();
    h.store.insert("notes", "a", fields("A", 1));
    let sync = h.mount::<Notes>();
    wait_until(&sync, |s| s.is_connected()).await;

    h.store.set_available(false);
    let state = wait_until(&sync, |s| s.offline).await;
    assert_eq!(titles(&state.records), vec!["A"]);
    assert!(!state.loading);
  }

  #[tokio::test]
  async fn test_degraded_monitor_moves_every_instance_offline() {
    let h = Harness::new();
    h.store.insert("notes", "a", fields("A", 1));
    let notes = h.mount::<Notes>();
    let drafts = h.mount::<Drafts>();
    wait_until(&notes, |s| s.is_connected()).await;
    wait_until(&drafts, |s| s.is_connected()).await;

    h.monitor.mark_offline("blocked by extension");
    assert!(wait_until(&notes, |s| s.offline).await.records.len() == 1);
    wait_until(&drafts, |s| s.offline).await;
    assert_eq!(h.store.watcher_count(), 0);

    // Retry from either instance reconnects both
    notes.retry();
    wait_until(&notes, |s| s.is_connected()).await;
    wait_until(&drafts, |s| s.is_connected()).await;
  }

  #[tokio::test]
  async fn test_offline_create_rejected_under_reject_policy() {
    let h = Harness::new();
    h.store.set_available(false);
    let sync = h.mount::<Notes>();
    wait_until(&sync, |s| s.offline).await;
    h.store.set_available(true);

    let err = sync.create(note("", "new", 5)).await.unwrap_err();
    assert!(matches!(err, SyncError::Offline { .. }));
    assert!(sync.records().is_empty());
    assert_eq!(h.store.write_count(), 0);
  }

  #[tokio::test]
  async fn test_offline_create_local_only_adds_one_pending_record() {
    let h = Harness::new();
    h.store.set_available(false);
    let sync = h.mount::<Drafts>();
    wait_until(&sync, |s| s.offline).await;

    let id = sync.create(note("", "draft", 5)).await.unwrap();
    assert!(id.is_pending());

    let records = sync.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    assert_eq!(h.store.write_count(), 0);
    assert_eq!(h.cache.get::<Vec<Note>>("drafts"), Some(records));

    // Persisted records cannot change while offline
    let err = sync.delete(&RecordId::from("remote-1")).await.unwrap_err();
    assert!(matches!(err, SyncError::Offline { .. }));

    // Pending ones can
    let mut edited = sync.records()[0].clone();
    edited.title = "edited".into();
    sync.update(edited).await.unwrap();
    assert_eq!(titles(&sync.records()), vec!["edited"]);
  }

  #[tokio::test]
  async fn test_pending_records_replayed_on_reconnect() {
    let h = Harness::new();
    h.store.set_available(false);
    let sync = h.mount::<Drafts>();
    wait_until(&sync, |s| s.offline).await;
    sync.create(note("", "draft", 5)).await.unwrap();

    h.store.set_available(true);
    assert!(sync.retry());

    let state = wait_until(&sync, |s| {
      s.is_connected() && s.records.len() == 1 && !s.records[0].id.is_pending()
    })
    .await;
    assert_eq!(titles(&state.records), vec!["draft"]);
    assert_eq!(h.store.write_count(), 1);
    assert_eq!(h.store.documents("drafts").len(), 1);
  }

  #[tokio::test]
  async fn test_online_mutations_write_through() {
    let h = Harness::new();
    let sync = h.mount::<Notes>();
    wait_until(&sync, |s| s.is_connected()).await;

    let id = sync.create(note("", "fresh", 9)).await.unwrap();
    assert!(!id.is_pending());
    assert_eq!(titles(&sync.records()), vec!["fresh"]);

    let mut changed = sync.records()[0].clone();
    changed.title = "renamed".into();
    sync.update(changed).await.unwrap();
    assert_eq!(titles(&sync.records()), vec!["renamed"]);
    assert_eq!(h.store.documents("notes")[0].fields["title"], "renamed");

    sync.delete(&id).await.unwrap();
    assert!(sync.records().is_empty());
    assert_eq!(h.cache.get::<Vec<Note>>("notes"), Some(Vec::new()));
  }

  #[tokio::test]
  async fn test_online_mutation_failure_is_propagated() {
    let h = Harness::new();
    let sync = h.mount::<Notes>();
    wait_until(&sync, |s| s.is_connected()).await;

    h.store
      .fail_next_write(StoreError::PermissionDenied("rules".into()));
    let err = sync.create(note("", "nope", 1)).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::PermissionDenied(_))));
    assert!(sync.records().is_empty());
    assert!(sync.state().error.is_some());
    assert!(!sync.is_offline());
  }

  #[tokio::test]
  async fn test_probe_serves_fallback_until_documents_exist() {
    let h = Harness::new();
    let sync = h.mount::<Pinned>();
    let state = wait_until(&sync, |s| !s.loading).await;
    assert!(!state.offline);
    assert_eq!(titles(&state.records), vec!["Welcome"]);

    h.store.insert("pinned", "p1", fields("Real", 1));
    let state = wait_until(&sync, |s| s.records.iter().any(|n| n.title == "Real")).await;
    assert_eq!(state.records.len(), 1);
  }

  #[tokio::test]
  async fn test_unmount_releases_subscription() {
    let h = Harness::new();
    let mut sync = h.mount::<Notes>();
    wait_until(&sync, |s| s.is_connected()).await;
    assert_eq!(h.store.watcher_count(), 1);

    sync.unmount();
    tokio::time::timeout(Duration::from_secs(2), async {
      while h.store.watcher_count() > 0 {
        tokio::task::yield_now().await;
      }
    })
    .await
    .expect("subscription still attached");

    // No state changes after teardown
    h.store.insert("notes", "late", fields("late", 1));
    tokio::task::yield_now().await;
    assert!(sync.records().is_empty());
    assert!(matches!(
      sync.create(note("", "x", 1)).await,
      Err(SyncError::Unmounted(_))
    ));
  }

  #[tokio::test]
  async fn test_create_during_replay_is_not_lost() {
    let h = Harness::new();
    let store = Arc::new(SlowCreates {
      inner: h.store.clone(),
      delay: Duration::from_millis(200),
    });
    h.store.set_available(false);
    let sync = CollectionSync::<Drafts>::mount_with(
      store,
      h.cache.clone(),
      h.monitor.clone(),
      SyncOptions::default(),
    );
    wait_until(&sync, |s| s.offline).await;
    sync.create(note("", "first", 1)).await.unwrap();

    h.store.set_available(true);
    assert!(sync.retry());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Lands while "first" is still being replayed
    let id = sync.create(note("", "second", 2)).await.unwrap();
    assert!(!id.is_pending());

    let state = wait_until(&sync, |s| {
      s.is_connected() && s.records.len() == 2 && s.records.iter().all(|n| !n.id.is_pending())
    })
    .await;
    assert_eq!(titles(&state.records), vec!["first", "second"]);
    assert_eq!(h.store.documents("drafts").len(), 2);
    assert_eq!(h.cache.get::<Vec<Note>>("drafts"), Some(state.records));
  }

  #[tokio::test]
  async fn test_update_by_replayed_local_id_reaches_store() {
    let h = Harness::new();
    h.store.set_available(false);
    let sync = h.mount::<Drafts>();
    wait_until(&sync, |s| s.offline).await;
    let local = sync.create(note("", "draft", 5)).await.unwrap();

    h.store.set_available(true);
    sync.retry();
    wait_until(&sync, |s| {
      s.is_connected() && s.records.len() == 1 && !s.records[0].id.is_pending()
    })
    .await;

    let mut edited = note("", "edited", 5);
    edited.id = local;
    sync.update(edited).await.unwrap();

    assert_eq!(h.store.documents("drafts")[0].fields["title"], "edited");
    let records = sync.records();
    assert_eq!(titles(&records), vec!["edited"]);
    assert!(!records[0].id.is_pending());
  }

  #[tokio::test]
  async fn test_expired_cache_keeps_pending_records_for_replay() {
    let mut h = Harness::new();
    let clock = Arc::new(ManualClock::new(0));
    h.cache = CacheManager::new(MemoryStorage::new()).with_clock(clock.clone());
    let options = SyncOptions {
      stale_policy: StalePolicy::FreshOnly,
    };
    h.store.set_available(false);

    let sync = h.mount_with::<Drafts>(options);
    wait_until(&sync, |s| s.offline).await;
    sync.create(note("", "draft", 5)).await.unwrap();
    drop(sync);

    clock.advance(h.cache.ttl_millis() + 1);
    let sync = h.mount_with::<Drafts>(options);
    let state = wait_until(&sync, |s| s.offline).await;

    // The expired collection entry is gone, the unsynced draft is not
    assert_eq!(h.cache.get::<Vec<Note>>("drafts"), None);
    assert_eq!(titles(&state.records), vec!["draft"]);
    assert!(state.records[0].id.is_pending());

    h.store.set_available(true);
    sync.retry();
    wait_until(&sync, |s| {
      s.is_connected() && s.records.len() == 1 && !s.records[0].id.is_pending()
    })
    .await;
    assert_eq!(h.store.write_count(), 1);
    assert_eq!(h.store.documents("drafts")[0].fields["title"], "draft");
    assert_eq!(h.cache.get::<Vec<Note>>("drafts_pending"), None);
  }

  #[tokio::test]
  async fn test_failed_replay_stays_pending_after_server_records() {
    let h = Harness::new();
    h.store.insert("drafts", "s1", fields("server", 1));
    h.store.set_available(false);
    let sync = h.mount::<Drafts>();
    wait_until(&sync, |s| s.offline).await;
    let local = sync.create(note("", "draft", 5)).await.unwrap();

    h.store.set_available(true);
    h.store
      .fail_next_write(StoreError::PermissionDenied("rules".into()));
    sync.retry();

    let state = wait_until(&sync, |s| s.is_connected()).await;
    assert_eq!(titles(&state.records), vec!["server", "draft"]);
    assert_eq!(state.records[1].id, local);
    assert_eq!(state.error, None);
    assert_eq!(h.store.write_count(), 0);
    assert_eq!(h.cache.get::<Vec<Note>>("drafts"), Some(state.records.clone()));
    assert_eq!(
      h.cache.get::<Vec<Note>>("drafts_pending"),
      Some(vec![state.records[1].clone()])
    );
  }

  #[tokio::test]
  async fn test_snapshot_does_not_clear_degraded_monitor() {
    let h = Harness::new();
    let notes = h.mount::<Notes>();
    wait_until(&notes, |s| s.is_connected()).await;

    h.monitor.mark_offline("blocked by extension");
    wait_until(&notes, |s| s.offline).await;

    // A snapshot that was already in flight when another instance gave up
    notes
      .shared
      .apply_snapshot(Snapshot {
        documents: vec![Document::new("late", fields("late", 1))],
      })
      .await;
    assert!(h.monitor.is_degraded());
    assert_eq!(h.monitor.status(), ConnectionStatus::Offline);
  }
}
