//! Bulk warm/refresh of the read cache.
//!
//! On app start and on resume the reference endpoints are fetched together
//! and written straight into the cache, so the first offline session already
//! has data. Individual fetch failures are logged and skipped; the rest of
//! the batch still lands.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::{classify_response, ApiError, HttpRequest, Transport};
use crate::cache::{logical, ReadCache};
use crate::net::Connectivity;

/// One reference endpoint warmed into the cache.
#[derive(Debug, Clone)]
pub struct BootstrapTarget {
  pub key: String,
  pub url: String,
}

impl BootstrapTarget {
  pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      url: url.into(),
    }
  }
}

/// The reference data a field client needs before going offline.
pub fn default_targets() -> Vec<BootstrapTarget> {
  vec![
    BootstrapTarget::new(logical::ACCOUNTS, "/api/accounting/accounts"),
    BootstrapTarget::new(
      logical::ACCOUNTS_ACTIVE,
      "/api/accounting/accounts?is_active=true",
    ),
    BootstrapTarget::new(
      logical::category_tree(Some("income")),
      "/api/accounting/categories/tree?type=income",
    ),
    BootstrapTarget::new(
      logical::category_tree(Some("expense")),
      "/api/accounting/categories/tree?type=expense",
    ),
    BootstrapTarget::new(logical::CURRENCIES_TENANT, "/api/currencies/tenant"),
    BootstrapTarget::new(logical::DEFAULT_CURRENCY, "/api/currencies/tenant/default"),
    BootstrapTarget::new(logical::PRIMARY_ACCOUNT, "/api/accounting/primary-account"),
  ]
}

pub struct CacheBootstrap {
  transport: Arc<dyn Transport>,
  cache: ReadCache,
  net: Connectivity,
  timeout: Duration,
}

impl CacheBootstrap {
  pub fn new(
    transport: Arc<dyn Transport>,
    cache: ReadCache,
    net: Connectivity,
    timeout: Duration,
  ) -> Self {
    Self {
      transport,
      cache,
      net,
      timeout,
    }
  }

  /// Fetch every target and cache the results. Returns how many landed.
  /// A no-op offline.
  pub async fn refresh(&self, targets: &[BootstrapTarget]) -> usize {
    if !self.net.is_online() {
      debug!("offline, skipping cache bootstrap");
      return 0;
    }

    let fetches = targets.iter().map(|target| self.fetch_one(target));
    let results = futures::future::join_all(fetches).await;

    results.into_iter().filter(|ok| *ok).count()
  }

  async fn fetch_one(&self, target: &BootstrapTarget) -> bool {
    match self.fetch(target).await {
      Ok(()) => true,
      Err(err) => {
        warn!("bootstrap fetch for {} failed: {}", target.key, err);
        false
      }
    }
  }

  async fn fetch(&self, target: &BootstrapTarget) -> Result<(), ApiError> {
    let resp = self
      .transport
      .send(HttpRequest {
        method: "GET".to_string(),
        url: target.url.clone(),
        body: None,
        headers: Vec::new(),
        timeout: self.timeout,
      })
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let data = classify_response(resp)?;
    self
      .cache
      .set_cached(&target.key, &data)
      .map_err(|e| ApiError::Logical(format!("cache write failed: {}", e)))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::transport::testing::ScriptedTransport;
  use crate::cache::{resolve_store, ReadCacheStore};
  use serde_json::json;

  fn fixture(online: bool) -> (tempfile::TempDir, Arc<ScriptedTransport>, CacheBootstrap, ReadCache) {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(ReadCacheStore::open(&dir.path().join("read_cache.db")).unwrap());
    let net = Connectivity::new(online);
    let cache = ReadCache::new(store, net.clone());
    let bootstrap = CacheBootstrap::new(
      Arc::clone(&transport) as Arc<dyn Transport>,
      cache.clone(),
      net,
      Duration::from_secs(15),
    );
    (dir, transport, bootstrap, cache)
  }

  #[tokio::test]
  async fn refresh_caches_every_target() {
    let (_dir, transport, bootstrap, cache) = fixture(true);

    let targets = vec![
      BootstrapTarget::new("accounts", "/api/accounting/accounts"),
      BootstrapTarget::new("defaultCurrency", "/api/currencies/tenant/default"),
    ];
    transport.push_response(200, json!({"success": true, "data": [{"id": 1}]}));
    transport.push_response(200, json!({"success": true, "data": {"code": "USD"}}));

    let landed = bootstrap.refresh(&targets).await;
    assert_eq!(landed, 2);
    assert!(cache.get_cached("accounts").unwrap().is_some());
    assert!(cache.get_cached("defaultCurrency").unwrap().is_some());
  }

  #[tokio::test]
  async fn refresh_is_a_no_op_offline() {
    let (_dir, transport, bootstrap, _cache) = fixture(false);

    let landed = bootstrap.refresh(&default_targets()).await;
    assert_eq!(landed, 0);
    assert_eq!(transport.sent_count(), 0);
  }

  #[tokio::test]
  async fn one_failed_fetch_does_not_sink_the_batch() {
    let (_dir, transport, bootstrap, cache) = fixture(true);

    let targets = vec![
      BootstrapTarget::new("accounts", "/api/accounting/accounts"),
      BootstrapTarget::new("defaultCurrency", "/api/currencies/tenant/default"),
    ];
    transport.push_network_failure("connection reset");
    transport.push_response(200, json!({"success": true, "data": {"code": "USD"}}));

    let landed = bootstrap.refresh(&targets).await;
    assert_eq!(landed, 1);
    assert!(cache.get_cached("accounts").unwrap().is_none());
    assert!(cache.get_cached("defaultCurrency").unwrap().is_some());
  }

  #[test]
  fn default_targets_all_resolve_to_a_store() {
    for target in default_targets() {
      assert!(
        resolve_store(&target.key).is_some(),
        "unmapped bootstrap key {}",
        target.key
      );
    }
  }
}
