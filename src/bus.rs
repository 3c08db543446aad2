//! Invalidation bus.
//!
//! Decouples "a sync succeeded and changed entity E" from "who needs to
//! know". Entity ids accumulate in a shared set and are cleared by each
//! consumer for the ids it reacted to — never automatically, so independent
//! consumers don't race each other. List staleness is a separate monotonic
//! marker. The bus also carries the dispatcher→scheduler "write enqueued"
//! hook so the two stay decoupled.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Notification that the dispatcher parked a write in the queue.
#[derive(Debug, Clone)]
pub struct EnqueuedWrite {
  pub id: String,
  pub url: String,
}

#[derive(Debug, Default)]
struct BusState {
  entity_ids: HashSet<i64>,
  abandoned: Vec<String>,
}

/// Shared invalidation state. Cheap to clone a handle via `Arc`.
pub struct InvalidationBus {
  state: Mutex<BusState>,
  list_marker: AtomicU64,
  enqueued_tx: mpsc::UnboundedSender<EnqueuedWrite>,
  enqueued_rx: Mutex<Option<mpsc::UnboundedReceiver<EnqueuedWrite>>>,
}

impl InvalidationBus {
  pub fn new() -> Self {
    let (enqueued_tx, enqueued_rx) = mpsc::unbounded_channel();
    Self {
      state: Mutex::new(BusState::default()),
      list_marker: AtomicU64::new(0),
      enqueued_tx,
      enqueued_rx: Mutex::new(Some(enqueued_rx)),
    }
  }

  /// Union the given ids into the observed set.
  pub fn publish_entity_ids(&self, ids: &[i64]) {
    if ids.is_empty() {
      return;
    }
    let mut state = match self.state.lock() {
      Ok(s) => s,
      Err(poisoned) => poisoned.into_inner(),
    };
    state.entity_ids.extend(ids.iter().copied());
    debug!("published {} invalidated entity ids", ids.len());
  }

  /// Snapshot of the observed ids, sorted for stable iteration.
  pub fn entity_ids(&self) -> Vec<i64> {
    let state = match self.state.lock() {
      Ok(s) => s,
      Err(poisoned) => poisoned.into_inner(),
    };
    let mut ids: Vec<i64> = state.entity_ids.iter().copied().collect();
    ids.sort_unstable();
    ids
  }

  /// A consumer clears only the ids it has reacted to.
  pub fn clear_entity_id(&self, id: i64) {
    let mut state = match self.state.lock() {
      Ok(s) => s,
      Err(poisoned) => poisoned.into_inner(),
    };
    state.entity_ids.remove(&id);
  }

  pub fn clear_all_entities(&self) {
    let mut state = match self.state.lock() {
      Ok(s) => s,
      Err(poisoned) => poisoned.into_inner(),
    };
    state.entity_ids.clear();
  }

  /// Bump the list-staleness marker; list consumers compare against the
  /// marker they last observed to decide whether to refetch.
  pub fn publish_list_invalidated(&self) -> u64 {
    self.list_marker.fetch_add(1, Ordering::SeqCst) + 1
  }

  pub fn list_marker(&self) -> u64 {
    self.list_marker.load(Ordering::SeqCst)
  }

  /// Record an entry abandoned by the retry policy, for the UI to surface.
  pub fn publish_abandoned(&self, id: &str) {
    let mut state = match self.state.lock() {
      Ok(s) => s,
      Err(poisoned) => poisoned.into_inner(),
    };
    state.abandoned.push(id.to_string());
  }

  /// Drain the abandoned-entry notifications.
  pub fn take_abandoned(&self) -> Vec<String> {
    let mut state = match self.state.lock() {
      Ok(s) => s,
      Err(poisoned) => poisoned.into_inner(),
    };
    std::mem::take(&mut state.abandoned)
  }

  /// Announce a freshly parked write. Dropped silently when nothing
  /// subscribed (e.g. one-shot CLI runs without a scheduler).
  pub fn notify_enqueued(&self, event: EnqueuedWrite) {
    let _ = self.enqueued_tx.send(event);
  }

  /// Take the enqueued-write receiver. Single-subscriber: the first caller
  /// gets it, later calls get `None`.
  pub fn subscribe_enqueued(&self) -> Option<mpsc::UnboundedReceiver<EnqueuedWrite>> {
    match self.enqueued_rx.lock() {
      Ok(mut rx) => rx.take(),
      Err(poisoned) => poisoned.into_inner().take(),
    }
  }
}

impl Default for InvalidationBus {
  fn default() -> Self {
    Self::new()
  }
}
