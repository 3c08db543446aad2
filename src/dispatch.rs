//! Request dispatcher: per-call decision between sending now and parking the
//! mutation in the write queue.
//!
//! Reads never queue. A retryable failure of a direct mutation attempt turns
//! into a queued acknowledgment, not an error; permanent rejections propagate
//! to the caller and are never enqueued.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{classify_response, ApiError, HttpRequest, Transport};
use crate::bus::{EnqueuedWrite, InvalidationBus};
use crate::net::Connectivity;
use crate::queue::{EnqueueOptions, EnqueueReceipt, WriteQueueStore};

/// One outbound call as the caller describes it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: String,
  pub url: String,
  pub payload: Option<Value>,
  /// Correlation token recorded on the queue entry; the engine ignores it.
  pub client_id: Option<String>,
  /// Session-critical calls (login and friends) always go direct and are
  /// never enqueued, whatever the connectivity or failure class.
  pub skip_queue: bool,
}

impl ApiRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self::new("GET", url, None)
  }

  pub fn post(url: impl Into<String>, payload: Value) -> Self {
    Self::new("POST", url, Some(payload))
  }

  pub fn put(url: impl Into<String>, payload: Value) -> Self {
    Self::new("PUT", url, Some(payload))
  }

  pub fn delete(url: impl Into<String>) -> Self {
    Self::new("DELETE", url, None)
  }

  pub fn new(method: &str, url: impl Into<String>, payload: Option<Value>) -> Self {
    Self {
      method: method.to_uppercase(),
      url: url.into(),
      payload,
      client_id: None,
      skip_queue: false,
    }
  }

  pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
    self.client_id = Some(client_id.into());
    self
  }

  pub fn skip_queue(mut self) -> Self {
    self.skip_queue = true;
    self
  }

  fn is_read_only(&self) -> bool {
    matches!(self.method.as_str(), "GET" | "HEAD" | "OPTIONS")
  }
}

/// What the caller observes from a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
  /// The server processed the call; the envelope body is attached.
  Done(Value),
  /// The mutation was parked for a later sync pass.
  Queued(EnqueueReceipt),
}

#[derive(Debug, Error)]
pub enum DispatchError {
  #[error(transparent)]
  Api(#[from] ApiError),
  /// Local persistence failed; fails the originating call outright.
  #[error("queue storage failed: {0}")]
  Storage(String),
}

pub struct RequestDispatcher {
  transport: Arc<dyn Transport>,
  queue: Arc<WriteQueueStore>,
  bus: Arc<InvalidationBus>,
  net: Connectivity,
  /// Short timeout for direct attempts; the caller is waiting on this one.
  interactive_timeout: Duration,
}

impl RequestDispatcher {
  pub fn new(
    transport: Arc<dyn Transport>,
    queue: Arc<WriteQueueStore>,
    bus: Arc<InvalidationBus>,
    net: Connectivity,
    interactive_timeout: Duration,
  ) -> Self {
    Self {
      transport,
      queue,
      bus,
      net,
      interactive_timeout,
    }
  }

  /// Send now or enqueue for later.
  pub async fn dispatch(&self, req: ApiRequest) -> Result<DispatchOutcome, DispatchError> {
    if req.is_read_only() || req.skip_queue {
      // Reads and session-critical calls pass straight through; their
      // failures propagate to the caller unmodified.
      let data = self.attempt(&req).await?;
      return Ok(DispatchOutcome::Done(data));
    }

    if !self.net.is_online() {
      debug!("offline, queueing {} {}", req.method, req.url);
      return self.enqueue(&req).map(DispatchOutcome::Queued);
    }

    match self.attempt(&req).await {
      Ok(data) => Ok(DispatchOutcome::Done(data)),
      Err(err) if err.is_retryable() => {
        info!("direct {} {} failed ({}), queueing", req.method, req.url, err);
        self.enqueue(&req).map(DispatchOutcome::Queued)
      }
      Err(err) => Err(err.into()),
    }
  }

  async fn attempt(&self, req: &ApiRequest) -> Result<Value, ApiError> {
    let resp = self
      .transport
      .send(HttpRequest {
        method: req.method.clone(),
        url: req.url.clone(),
        body: req.payload.clone(),
        headers: Vec::new(),
        timeout: self.interactive_timeout,
      })
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    classify_response(resp)
  }

  fn enqueue(&self, req: &ApiRequest) -> Result<EnqueueReceipt, DispatchError> {
    let receipt = self
      .queue
      .enqueue(
        &req.method,
        &req.url,
        req.payload.as_ref(),
        EnqueueOptions {
          client_id: req.client_id.clone(),
        },
      )
      .map_err(|e| DispatchError::Storage(e.to_string()))?;

    // Kick the scheduler so a just-regained connection drains right away
    // instead of waiting for the next timer tick.
    self.bus.notify_enqueued(EnqueuedWrite {
      id: receipt.id.clone(),
      url: req.url.clone(),
    });

    Ok(receipt)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::transport::testing::ScriptedTransport;
  use crate::queue::QueueStatus;
  use serde_json::json;

  struct Fixture {
    _dir: tempfile::TempDir,
    transport: Arc<ScriptedTransport>,
    queue: Arc<WriteQueueStore>,
    bus: Arc<InvalidationBus>,
    dispatcher: RequestDispatcher,
  }

  fn fixture(online: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    let queue = Arc::new(WriteQueueStore::open(&dir.path().join("queue.db")).unwrap());
    let bus = Arc::new(InvalidationBus::new());
    let net = Connectivity::new(online);
    let dispatcher = RequestDispatcher::new(
      Arc::clone(&transport) as Arc<dyn Transport>,
      Arc::clone(&queue),
      Arc::clone(&bus),
      net,
      Duration::from_secs(10),
    );
    Fixture {
      _dir: dir,
      transport,
      queue,
      bus,
      dispatcher,
    }
  }

  #[tokio::test]
  async fn offline_mutation_queues_without_touching_the_network() {
    let f = fixture(false);

    let out = f
      .dispatcher
      .dispatch(ApiRequest::post("/api/x", json!({"a": 1})))
      .await
      .unwrap();

    let receipt = match out {
      DispatchOutcome::Queued(r) => r,
      other => panic!("expected queued outcome, got {:?}", other),
    };
    assert_eq!(receipt.status, QueueStatus::Pending);
    assert_eq!(f.transport.sent_count(), 0);

    let entry = f.queue.get(&receipt.id).unwrap().unwrap();
    assert_eq!(entry.payload, Some(json!({"a": 1})));
  }

  #[tokio::test]
  async fn online_mutation_sends_directly() {
    let f = fixture(true);
    f.transport
      .push_response(200, json!({"success": true, "data": {"id": 9}}));

    let out = f
      .dispatcher
      .dispatch(ApiRequest::post("/api/x", json!({"a": 1})))
      .await
      .unwrap();

    assert_eq!(
      out,
      DispatchOutcome::Done(json!({"success": true, "data": {"id": 9}}))
    );
    assert_eq!(f.queue.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn retryable_failure_turns_into_a_queued_acknowledgment() {
    let f = fixture(true);
    f.transport.push_network_failure("connection reset");

    let out = f
      .dispatcher
      .dispatch(ApiRequest::post("/api/x", json!({"a": 1})))
      .await
      .unwrap();

    assert!(matches!(out, DispatchOutcome::Queued(_)));
    assert_eq!(f.queue.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn five_xx_failure_also_queues() {
    let f = fixture(true);
    f.transport.push_response(503, json!({"error": "unavailable"}));

    let out = f
      .dispatcher
      .dispatch(ApiRequest::post("/api/x", json!({"a": 1})))
      .await
      .unwrap();

    assert!(matches!(out, DispatchOutcome::Queued(_)));
  }

  #[tokio::test]
  async fn permanent_failure_propagates_and_never_queues() {
    let f = fixture(true);
    f.transport.push_response(400, json!({"error": "bad request"}));

    let err = f
      .dispatcher
      .dispatch(ApiRequest::post("/api/x", json!({"a": 1})))
      .await
      .unwrap_err();

    assert!(matches!(
      err,
      DispatchError::Api(ApiError::Client { status: 400, .. })
    ));
    assert_eq!(f.queue.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn logical_failure_on_two_xx_propagates_and_never_queues() {
    let f = fixture(true);
    f.transport
      .push_response(200, json!({"success": false, "error": "limit exceeded"}));

    let err = f
      .dispatcher
      .dispatch(ApiRequest::post("/api/x", json!({"a": 1})))
      .await
      .unwrap_err();

    assert!(matches!(err, DispatchError::Api(ApiError::Logical(_))));
    assert_eq!(f.queue.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn reads_never_queue_even_offline() {
    let f = fixture(false);
    f.transport.push_network_failure("offline");

    let err = f
      .dispatcher
      .dispatch(ApiRequest::get("/api/accounts"))
      .await
      .unwrap_err();

    assert!(matches!(err, DispatchError::Api(ApiError::Network(_))));
    assert_eq!(f.queue.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn skip_queue_mutation_fails_direct_even_when_retryable() {
    let f = fixture(true);
    f.transport.push_network_failure("connection reset");

    let err = f
      .dispatcher
      .dispatch(ApiRequest::post("/api/auth/login", json!({"u": "x"})).skip_queue())
      .await
      .unwrap_err();

    assert!(matches!(err, DispatchError::Api(ApiError::Network(_))));
    assert_eq!(f.queue.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn enqueue_emits_a_kick_for_the_scheduler() {
    let f = fixture(false);
    let mut rx = f.bus.subscribe_enqueued().unwrap();

    let out = f
      .dispatcher
      .dispatch(ApiRequest::post("/api/x", json!({"a": 1})))
      .await
      .unwrap();
    let receipt = match out {
      DispatchOutcome::Queued(r) => r,
      other => panic!("expected queued outcome, got {:?}", other),
    };

    let event = rx.recv().await.unwrap();
    assert_eq!(event.id, receipt.id);
    assert_eq!(event.url, "/api/x");
  }
}
