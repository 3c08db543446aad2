//! SQLite-backed write queue store.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use super::entry::{EnqueueOptions, EnqueueReceipt, EntryChanges, QueueEntry, QueueStatus};

/// Schema for the pending-writes log.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_writes (
    id TEXT PRIMARY KEY,
    client_id TEXT,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    payload BLOB,
    created_at INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    status TEXT NOT NULL,
    server_response BLOB
);

CREATE INDEX IF NOT EXISTS idx_pending_writes_status
    ON pending_writes(status, created_at);
"#;

/// Durable, ordered log of pending mutations.
///
/// Rows are keyed by the client-generated entry id; replay order is capture
/// order (`created_at` ascending, insertion order breaking ties).
pub struct WriteQueueStore {
  conn: Mutex<Connection>,
}

impl WriteQueueStore {
  /// Open (or create) the queue database at the default location.
  pub fn open_default(data_dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(data_dir)
      .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    Self::open(&data_dir.join("queue.db"))
  }

  pub fn open(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock_conn()?;
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;
    Ok(())
  }

  fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Persist a new mutation with a fresh id and `pending` status.
  ///
  /// The payload is stored byte-for-byte; the returned receipt is what the
  /// caller observes as its "queued" acknowledgment.
  pub fn enqueue(
    &self,
    method: &str,
    url: &str,
    payload: Option<&serde_json::Value>,
    opts: EnqueueOptions,
  ) -> Result<EnqueueReceipt> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now().timestamp_millis();
    let method = method.to_uppercase();
    let payload_bytes = payload
      .map(serde_json::to_vec)
      .transpose()
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    let conn = self.lock_conn()?;
    conn
      .execute(
        "INSERT INTO pending_writes (id, client_id, method, url, payload, created_at, retry_count, last_error, status, server_response)
         VALUES (?, ?, ?, ?, ?, ?, 0, NULL, ?, NULL)",
        params![
          id,
          opts.client_id,
          method,
          url,
          payload_bytes,
          created_at,
          QueueStatus::Pending.as_str()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue write: {}", e))?;

    Ok(EnqueueReceipt {
      id,
      client_id: opts.client_id,
      created_at,
      status: QueueStatus::Pending,
    })
  }

  /// All entries eligible for replay (`pending` or `failed`), ascending by
  /// capture time. This ordering is the replay contract: same-resource edits
  /// apply in the order the user made them.
  pub fn list_replayable(&self) -> Result<Vec<QueueEntry>> {
    self.query_entries(
      "SELECT id, client_id, method, url, payload, created_at, retry_count, last_error, status, server_response
       FROM pending_writes
       WHERE status IN ('pending', 'failed')
       ORDER BY created_at ASC, rowid ASC",
    )
  }

  /// Every entry, replay order first, for the status view.
  pub fn list_all(&self) -> Result<Vec<QueueEntry>> {
    self.query_entries(
      "SELECT id, client_id, method, url, payload, created_at, retry_count, last_error, status, server_response
       FROM pending_writes
       ORDER BY created_at ASC, rowid ASC",
    )
  }

  fn query_entries(&self, sql: &str) -> Result<Vec<QueueEntry>> {
    let conn = self.lock_conn()?;
    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let entries = stmt
      .query_map([], row_to_entry)
      .map_err(|e| eyre!("Failed to query queue entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read queue entry: {}", e))?;

    Ok(entries)
  }

  pub fn get(&self, id: &str) -> Result<Option<QueueEntry>> {
    let conn = self.lock_conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, client_id, method, url, payload, created_at, retry_count, last_error, status, server_response
         FROM pending_writes WHERE id = ?",
      )
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let entry = stmt.query_row(params![id], row_to_entry).ok();
    Ok(entry)
  }

  /// Merge changes into a stored entry.
  ///
  /// The whole row is read, merged, and rewritten inside one transaction, so
  /// readers never observe a partially updated entry.
  pub fn update(&self, id: &str, changes: EntryChanges) -> Result<()> {
    let mut entry = self
      .get(id)?
      .ok_or_else(|| eyre!("Queue entry {} not found", id))?;

    if let Some(status) = changes.status {
      entry.status = status;
    }
    if let Some(last_error) = changes.last_error {
      entry.last_error = last_error;
    }
    if let Some(retry_count) = changes.retry_count {
      entry.retry_count = retry_count;
    }
    if let Some(server_response) = changes.server_response {
      entry.server_response = Some(server_response);
    }

    let server_response_bytes = entry
      .server_response
      .as_ref()
      .map(serde_json::to_vec)
      .transpose()
      .map_err(|e| eyre!("Failed to serialize server response: {}", e))?;

    let conn = self.lock_conn()?;
    conn
      .execute(
        "UPDATE pending_writes
         SET status = ?, last_error = ?, retry_count = ?, server_response = ?
         WHERE id = ?",
        params![
          entry.status.as_str(),
          entry.last_error,
          entry.retry_count,
          server_response_bytes,
          id
        ],
      )
      .map_err(|e| eyre!("Failed to update queue entry {}: {}", id, e))?;

    Ok(())
  }

  pub fn delete(&self, id: &str) -> Result<()> {
    let conn = self.lock_conn()?;
    conn
      .execute("DELETE FROM pending_writes WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete queue entry {}: {}", id, e))?;
    Ok(())
  }

  /// Retention sweep: remove completed entries captured before `now - max_age`.
  /// Housekeeping only; never touches replayable or abandoned entries.
  pub fn purge_completed_older_than(&self, max_age: chrono::Duration) -> Result<usize> {
    let cutoff = Utc::now().timestamp_millis() - max_age.num_milliseconds();

    let conn = self.lock_conn()?;
    let removed = conn
      .execute(
        "DELETE FROM pending_writes WHERE status = 'completed' AND created_at < ?",
        params![cutoff],
      )
      .map_err(|e| eyre!("Failed to purge completed entries: {}", e))?;

    Ok(removed)
  }

  /// Number of entries still awaiting a successful replay.
  pub fn pending_count(&self) -> Result<usize> {
    let conn = self.lock_conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM pending_writes WHERE status IN ('pending', 'failed')",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count pending entries: {}", e))?;
    Ok(count as usize)
  }

  /// Return entries stranded in `syncing` by an interrupted pass to
  /// `pending` so they replay on the next pass.
  pub fn requeue_stale_syncing(&self) -> Result<usize> {
    let conn = self.lock_conn()?;
    let requeued = conn
      .execute(
        "UPDATE pending_writes SET status = 'pending' WHERE status = 'syncing'",
        [],
      )
      .map_err(|e| eyre!("Failed to requeue syncing entries: {}", e))?;
    Ok(requeued)
  }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
  let payload: Option<Vec<u8>> = row.get(4)?;
  let status_str: String = row.get(8)?;
  let server_response: Option<Vec<u8>> = row.get(9)?;

  Ok(QueueEntry {
    id: row.get(0)?,
    client_id: row.get(1)?,
    method: row.get(2)?,
    url: row.get(3)?,
    payload: payload.and_then(|bytes| serde_json::from_slice(&bytes).ok()),
    created_at: row.get(5)?,
    retry_count: row.get(6)?,
    last_error: row.get(7)?,
    status: QueueStatus::parse(&status_str).unwrap_or(QueueStatus::Failed),
    server_response: server_response.and_then(|bytes| serde_json::from_slice(&bytes).ok()),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn open_store() -> (tempfile::TempDir, WriteQueueStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = WriteQueueStore::open(&dir.path().join("queue.db")).unwrap();
    (dir, store)
  }

  #[test]
  fn enqueue_assigns_id_and_pending_status() {
    let (_dir, store) = open_store();

    let receipt = store
      .enqueue(
        "post",
        "/api/accounting/transactions",
        Some(&json!({"amount": 12.5})),
        EnqueueOptions {
          client_id: Some("txn-form-1".into()),
        },
      )
      .unwrap();

    assert_eq!(receipt.status, QueueStatus::Pending);
    assert_eq!(receipt.client_id.as_deref(), Some("txn-form-1"));

    let entry = store.get(&receipt.id).unwrap().unwrap();
    assert_eq!(entry.method, "POST");
    assert_eq!(entry.retry_count, 0);
    assert_eq!(entry.payload, Some(json!({"amount": 12.5})));
  }

  #[test]
  fn list_replayable_preserves_capture_order_and_payloads() {
    let (_dir, store) = open_store();

    let payloads: Vec<_> = (0..5).map(|i| json!({"seq": i})).collect();
    let mut ids = Vec::new();
    for payload in &payloads {
      let receipt = store
        .enqueue("POST", "/api/x", Some(payload), EnqueueOptions::default())
        .unwrap();
      ids.push(receipt.id);
    }

    let replayable = store.list_replayable().unwrap();
    assert_eq!(replayable.len(), 5);
    for (i, entry) in replayable.iter().enumerate() {
      assert_eq!(entry.id, ids[i]);
      assert_eq!(entry.payload, Some(payloads[i].clone()));
    }
  }

  #[test]
  fn failed_entries_remain_replayable_but_completed_do_not() {
    let (_dir, store) = open_store();

    let a = store
      .enqueue("POST", "/api/x", Some(&json!({"a": 1})), EnqueueOptions::default())
      .unwrap();
    let b = store
      .enqueue("POST", "/api/y", Some(&json!({"b": 2})), EnqueueOptions::default())
      .unwrap();

    store
      .update(
        &a.id,
        EntryChanges {
          status: Some(QueueStatus::Completed),
          server_response: Some(json!({"success": true})),
          ..Default::default()
        },
      )
      .unwrap();
    store
      .update(
        &b.id,
        EntryChanges {
          status: Some(QueueStatus::Failed),
          last_error: Some(Some("server error (500): boom".into())),
          retry_count: Some(1),
          ..Default::default()
        },
      )
      .unwrap();

    let replayable = store.list_replayable().unwrap();
    assert_eq!(replayable.len(), 1);
    assert_eq!(replayable[0].id, b.id);
    assert_eq!(replayable[0].retry_count, 1);
    assert_eq!(
      replayable[0].last_error.as_deref(),
      Some("server error (500): boom")
    );
  }

  #[test]
  fn update_merges_without_clearing_other_fields() {
    let (_dir, store) = open_store();

    let receipt = store
      .enqueue("PUT", "/api/x/1", Some(&json!({"v": 1})), EnqueueOptions::default())
      .unwrap();

    store
      .update(
        &receipt.id,
        EntryChanges {
          status: Some(QueueStatus::Syncing),
          ..Default::default()
        },
      )
      .unwrap();

    let entry = store.get(&receipt.id).unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Syncing);
    assert_eq!(entry.payload, Some(json!({"v": 1})));
    assert_eq!(entry.created_at, receipt.created_at);
  }

  #[test]
  fn purge_removes_only_old_completed_entries() {
    let (_dir, store) = open_store();

    let old_completed = store
      .enqueue("POST", "/api/x", None, EnqueueOptions::default())
      .unwrap();
    let old_pending = store
      .enqueue("POST", "/api/y", None, EnqueueOptions::default())
      .unwrap();
    let fresh_completed = store
      .enqueue("POST", "/api/z", None, EnqueueOptions::default())
      .unwrap();

    // Age the first two entries past the retention window.
    {
      let conn = store.conn.lock().unwrap();
      let aged = Utc::now().timestamp_millis() - chrono::Duration::hours(48).num_milliseconds();
      conn
        .execute(
          "UPDATE pending_writes SET created_at = ? WHERE id IN (?, ?)",
          params![aged, old_completed.id, old_pending.id],
        )
        .unwrap();
    }
    for id in [&old_completed.id, &fresh_completed.id] {
      store
        .update(
          id,
          EntryChanges {
            status: Some(QueueStatus::Completed),
            ..Default::default()
          },
        )
        .unwrap();
    }

    let removed = store
      .purge_completed_older_than(chrono::Duration::hours(24))
      .unwrap();
    assert_eq!(removed, 1);

    let remaining: Vec<_> = store.list_all().unwrap().into_iter().map(|e| e.id).collect();
    assert!(remaining.contains(&old_pending.id));
    assert!(remaining.contains(&fresh_completed.id));
    assert!(!remaining.contains(&old_completed.id));
  }

  #[test]
  fn requeue_returns_stranded_syncing_entries_to_pending() {
    let (_dir, store) = open_store();

    let receipt = store
      .enqueue("POST", "/api/x", None, EnqueueOptions::default())
      .unwrap();
    store
      .update(
        &receipt.id,
        EntryChanges {
          status: Some(QueueStatus::Syncing),
          ..Default::default()
        },
      )
      .unwrap();
    assert!(store.list_replayable().unwrap().is_empty());

    assert_eq!(store.requeue_stale_syncing().unwrap(), 1);
    assert_eq!(store.list_replayable().unwrap().len(), 1);
  }
}
