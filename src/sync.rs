//! Sync engine: drains the write queue against the remote API.
//!
//! One pass at a time, strictly sequential within a pass, so dependent edits
//! to the same resource replay in capture order. A trigger that arrives while
//! a pass is running is dropped, not queued; the recurring timer and resume
//! triggers carry liveness.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::api::{classify_response, ApiError, HttpRequest, Transport};
use crate::bus::InvalidationBus;
use crate::queue::{EntryChanges, QueueEntry, QueueStatus, WriteQueueStore};

const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Outcome counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub attempted: usize,
  pub completed: usize,
  pub failed: usize,
  pub abandoned: usize,
}

pub struct SyncEngine {
  transport: Arc<dyn Transport>,
  queue: Arc<WriteQueueStore>,
  bus: Arc<InvalidationBus>,
  /// Single-permit guard: only re-entrant invocation is being defended
  /// against; there is no preemptive parallelism in this model.
  guard: Semaphore,
  /// Longer timeout than interactive dispatch; nobody is waiting on screen.
  sync_timeout: Duration,
  /// Permanent (4xx) failures abandon the entry once `retry_count` reaches
  /// this ceiling. Retryable failures replay indefinitely.
  max_permanent_retries: u32,
}

impl SyncEngine {
  pub fn new(
    transport: Arc<dyn Transport>,
    queue: Arc<WriteQueueStore>,
    bus: Arc<InvalidationBus>,
    sync_timeout: Duration,
    max_permanent_retries: u32,
  ) -> color_eyre::Result<Self> {
    // A crash mid-pass strands entries in `syncing`; put them back.
    let requeued = queue.requeue_stale_syncing()?;
    if requeued > 0 {
      info!("requeued {} entries stranded by an interrupted pass", requeued);
    }

    Ok(Self {
      transport,
      queue,
      bus,
      guard: Semaphore::new(1),
      sync_timeout,
      max_permanent_retries,
    })
  }

  /// Run one sync pass. Returns `None` when a pass was already running and
  /// this trigger was coalesced into it.
  pub async fn run_pass(&self) -> color_eyre::Result<Option<SyncReport>> {
    let _permit = match self.guard.try_acquire() {
      Ok(permit) => permit,
      Err(_) => {
        debug!("sync pass already running, trigger dropped");
        return Ok(None);
      }
    };

    // The permit is held until this frame unwinds, so the guard is released
    // on the error path too.
    let report = self.drain().await?;
    Ok(Some(report))
  }

  async fn drain(&self) -> color_eyre::Result<SyncReport> {
    let entries = self.queue.list_replayable()?;
    let mut report = SyncReport::default();

    for entry in entries {
      report.attempted += 1;
      self.queue.update(
        &entry.id,
        EntryChanges {
          status: Some(QueueStatus::Syncing),
          ..Default::default()
        },
      )?;

      match self.replay(&entry).await {
        Ok(response) => {
          // Server wins: the response supersedes any local optimistic value.
          self.queue.update(
            &entry.id,
            EntryChanges {
              status: Some(QueueStatus::Completed),
              server_response: Some(response.clone()),
              last_error: Some(None),
              ..Default::default()
            },
          )?;
          report.completed += 1;
          debug!("synced {} {} ({})", entry.method, entry.url, entry.id);

          if is_tracked_reference_url(&entry.url) {
            let ids = affected_entity_ids(entry.payload.as_ref(), Some(&response));
            if !ids.is_empty() {
              self.bus.publish_entity_ids(&ids);
            }
            self.bus.publish_list_invalidated();
          }
        }
        Err(err) => {
          let retry_count = entry.retry_count + 1;
          let abandon = !err.is_retryable() && retry_count >= self.max_permanent_retries;
          let status = if abandon {
            QueueStatus::Abandoned
          } else {
            QueueStatus::Failed
          };

          self.queue.update(
            &entry.id,
            EntryChanges {
              status: Some(status),
              last_error: Some(Some(err.to_string())),
              retry_count: Some(retry_count),
              ..Default::default()
            },
          )?;

          if abandon {
            warn!(
              "abandoning {} {} after {} permanent failures: {}",
              entry.method, entry.url, retry_count, err
            );
            self.bus.publish_abandoned(&entry.id);
            report.abandoned += 1;
          } else {
            info!(
              "sync of {} {} failed (attempt {}): {}",
              entry.method, entry.url, retry_count, err
            );
            report.failed += 1;
          }
          // One entry's failure never aborts the pass.
        }
      }
    }

    Ok(report)
  }

  /// Replay one captured mutation verbatim.
  async fn replay(&self, entry: &QueueEntry) -> Result<Value, ApiError> {
    let mut headers = Vec::new();
    if entry.is_state_changing() {
      // Lets the server recognize and dedupe an earlier physical attempt of
      // this same logical write.
      headers.push((IDEMPOTENCY_HEADER.to_string(), entry.id.clone()));
    }

    let resp = self
      .transport
      .send(HttpRequest {
        method: entry.method.clone(),
        url: entry.url.clone(),
        body: entry.payload.clone(),
        headers,
        timeout: self.sync_timeout,
      })
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    classify_response(resp)
  }
}

/// Does this URL affect tracked reference data (account balances etc.)?
fn is_tracked_reference_url(url: &str) -> bool {
  url.contains("/accounting/transactions")
}

/// Collect affected account ids from a transaction payload and the server's
/// response envelope. Accepts numbers or numeric strings.
fn affected_entity_ids(payload: Option<&Value>, response: Option<&Value>) -> Vec<i64> {
  let mut ids = Vec::new();

  let mut collect = |value: &Value| {
    for field in ["account_id", "to_account_id"] {
      match value.get(field) {
        Some(Value::Number(n)) => {
          if let Some(id) = n.as_i64() {
            if !ids.contains(&id) {
              ids.push(id);
            }
          }
        }
        Some(Value::String(s)) => {
          if let Ok(id) = s.parse::<i64>() {
            if !ids.contains(&id) {
              ids.push(id);
            }
          }
        }
        _ => {}
      }
    }
  };

  if let Some(payload) = payload {
    collect(payload);
  }
  if let Some(response) = response {
    // The envelope nests the entity under `data`; fall back to the body
    // itself for bare responses.
    collect(response.get("data").unwrap_or(response));
  }

  ids
}
