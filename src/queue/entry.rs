//! Queue entry data model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a captured mutation.
///
/// `pending → syncing → {completed | failed}`; a `failed` entry is replayable
/// again on the next pass. `abandoned` is terminal: a permanent rejection
/// that exhausted its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
  Pending,
  Syncing,
  Completed,
  Failed,
  Abandoned,
}

impl QueueStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      QueueStatus::Pending => "pending",
      QueueStatus::Syncing => "syncing",
      QueueStatus::Completed => "completed",
      QueueStatus::Failed => "failed",
      QueueStatus::Abandoned => "abandoned",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending" => Some(QueueStatus::Pending),
      "syncing" => Some(QueueStatus::Syncing),
      "completed" => Some(QueueStatus::Completed),
      "failed" => Some(QueueStatus::Failed),
      "abandoned" => Some(QueueStatus::Abandoned),
      _ => None,
    }
  }
}

/// One captured mutation. The `id` is client-generated, stable for the
/// entry's lifetime, and doubles as the idempotency key sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
  pub id: String,
  /// Caller-supplied correlation token; the engine never reads it.
  pub client_id: Option<String>,
  pub method: String,
  pub url: String,
  pub payload: Option<Value>,
  /// Capture timestamp in epoch milliseconds; defines replay order.
  pub created_at: i64,
  pub retry_count: u32,
  pub last_error: Option<String>,
  pub status: QueueStatus,
  /// Authoritative server result once completed.
  pub server_response: Option<Value>,
}

impl QueueEntry {
  /// State-changing methods carry the idempotency header on replay.
  pub fn is_state_changing(&self) -> bool {
    matches!(self.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
  }
}

/// Caller options for `enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
  pub client_id: Option<String>,
}

/// Receipt returned to the caller once an entry is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
  pub id: String,
  pub client_id: Option<String>,
  pub created_at: i64,
  pub status: QueueStatus,
}

/// Partial update merged into a stored entry via whole-entry
/// read/merge/write, so a row is never left with a torn field set.
#[derive(Debug, Clone, Default)]
pub struct EntryChanges {
  pub status: Option<QueueStatus>,
  /// `Some(None)` clears a previously recorded error.
  pub last_error: Option<Option<String>>,
  pub retry_count: Option<u32>,
  pub server_response: Option<Value>,
}
