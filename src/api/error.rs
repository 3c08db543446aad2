//! Typed error taxonomy for remote calls.
//!
//! Every failed call ends up in exactly one of four classes, and the
//! retryable/permanent split drives both the dispatcher's queue-or-reject
//! decision and the sync engine's failure bookkeeping.

use thiserror::Error;

/// Outcome classification for a failed remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
  /// No response reached us at all (connection refused, DNS, timeout).
  #[error("network error: {0}")]
  Network(String),

  /// The server answered with a 5xx status.
  #[error("server error ({status}): {message}")]
  Server { status: u16, message: String },

  /// The server answered with a 4xx status.
  #[error("client error ({status}): {message}")]
  Client { status: u16, message: String },

  /// Transport succeeded (2xx) but the envelope carried `success: false`.
  /// The server actively processed and rejected the request.
  #[error("request rejected: {0}")]
  Logical(String),
}

impl ApiError {
  /// Whether a later physical attempt of the same logical write may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, ApiError::Network(_) | ApiError::Server { .. })
  }
}
