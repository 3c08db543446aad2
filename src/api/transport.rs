//! Transport seam between the queue machinery and the real network.
//!
//! The dispatcher and sync engine only see the [`Transport`] trait, so tests
//! script responses without a server. [`ReqwestTransport`] is the production
//! implementation: it joins paths onto the configured base URL, attaches the
//! bearer token, and applies the per-call timeout.

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::Config;

/// One outbound request, fully described.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  /// Uppercase HTTP method.
  pub method: String,
  /// Path relative to the API base URL (e.g. `/api/accounting/transactions`).
  pub url: String,
  /// JSON body; `None` for body-less methods.
  pub body: Option<Value>,
  /// Extra headers (idempotency key etc.).
  pub headers: Vec<(String, String)>,
  /// Per-call timeout; shorter for interactive attempts, longer for sync.
  pub timeout: Duration,
}

/// A response that actually reached us, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
  pub status: u16,
  /// Decoded JSON body; `Null` when the body was empty or not JSON.
  pub body: Value,
}

/// No response received at all. Timeouts land here too.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

/// Seam for sending requests. Implementations must not retry internally;
/// retry policy belongs to the queue and sync engine.
pub trait Transport: Send + Sync {
  fn send(&self, req: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// Production transport over reqwest.
pub struct ReqwestTransport {
  http: reqwest::Client,
  base_url: Url,
  token_env: String,
}

impl ReqwestTransport {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    let base_url = Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.api.base_url, e))?;

    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token_env: config.api.token_env.clone(),
    })
  }

  fn bearer_token(&self) -> Option<String> {
    std::env::var(&self.token_env).ok()
  }
}

impl Transport for ReqwestTransport {
  fn send(&self, req: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
    Box::pin(async move {
      let url = self
        .base_url
        .join(&req.url)
        .map_err(|e| TransportError(format!("invalid request path {}: {}", req.url, e)))?;

      let method = reqwest::Method::from_bytes(req.method.as_bytes())
        .map_err(|e| TransportError(format!("invalid method {}: {}", req.method, e)))?;

      let mut builder = self.http.request(method, url).timeout(req.timeout);

      if let Some(token) = self.bearer_token() {
        builder = builder.bearer_auth(token);
      }
      for (name, value) in &req.headers {
        builder = builder.header(name, value);
      }
      if let Some(body) = &req.body {
        builder = builder.json(body);
      }

      let resp = builder
        .send()
        .await
        .map_err(|e| TransportError(e.to_string()))?;

      let status = resp.status().as_u16();
      let text = resp
        .text()
        .await
        .map_err(|e| TransportError(format!("failed to read response body: {}", e)))?;
      let body = serde_json::from_str(&text).unwrap_or(Value::Null);

      Ok(HttpResponse { status, body })
    })
  }
}
