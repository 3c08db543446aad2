//! Cache-first orchestration over the snapshot store.

use color_eyre::Result;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::net::Connectivity;

use super::keys::CacheStore;
use super::store::ReadCacheStore;

/// Cache-first reads with background refresh.
#[derive(Clone)]
pub struct ReadCache {
  store: Arc<ReadCacheStore>,
  net: Connectivity,
}

impl ReadCache {
  pub fn new(store: Arc<ReadCacheStore>, net: Connectivity) -> Self {
    Self { store, net }
  }

  /// Cache-first get.
  ///
  /// On a hit the cached value returns immediately; when online, exactly one
  /// background refresh is spawned and its result overwrites the entry
  /// (refresh failures are logged and swallowed — the caller already has
  /// data). When offline the refresh is skipped entirely. On a miss the
  /// fetch runs inline and may block the caller.
  pub async fn get_with_cache<F, Fut>(&self, key: &str, fetch: F) -> Result<Value>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>> + Send + 'static,
  {
    if let Some(hit) = self.store.get_cached(key)? {
      if self.net.is_online() {
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        let refresh = fetch();
        tokio::spawn(async move {
          match refresh.await {
            Ok(fresh) => {
              if let Err(err) = store.set_cached(&key, &fresh) {
                warn!("failed to store refreshed value for {}: {}", key, err);
              }
            }
            Err(err) => debug!("background refresh for {} failed: {}", key, err),
          }
        });
      }
      return Ok(hit.data);
    }

    let fresh = fetch().await?;
    self.store.set_cached(key, &fresh)?;
    Ok(fresh)
  }

  /// Direct store access for bulk warm/refresh flows.
  pub fn set_cached(&self, key: &str, data: &Value) -> Result<()> {
    self.store.set_cached(key, data)
  }

  pub fn get_cached(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.store.get_cached(key)?.map(|v| v.data))
  }

  pub fn remove_cached(&self, key: &str) -> Result<()> {
    self.store.remove_cached(key)
  }

  /// Coarse invalidation: clear whole physical stores after structural
  /// changes (e.g. category edits).
  pub fn invalidate(&self, stores: &[CacheStore]) -> Result<()> {
    for store in stores {
      self.store.clear_store(*store)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn cache(online: bool) -> (tempfile::TempDir, ReadCache) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ReadCacheStore::open(&dir.path().join("read_cache.db")).unwrap());
    (dir, ReadCache::new(store, Connectivity::new(online)))
  }

  #[tokio::test]
  async fn miss_fetches_inline_and_caches() {
    let (_dir, cache) = cache(true);

    let out = cache
      .get_with_cache("accounts", || async { Ok(json!([{"id": 1}])) })
      .await
      .unwrap();

    assert_eq!(out, json!([{"id": 1}]));
    assert_eq!(cache.get_cached("accounts").unwrap(), Some(json!([{"id": 1}])));
  }

  #[tokio::test]
  async fn hit_returns_cached_value_and_refreshes_once_in_background() {
    let (_dir, cache) = cache(true);
    cache.set_cached("accounts", &json!([{"id": 1}])).unwrap();

    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fetches);
    let out = cache
      .get_with_cache("accounts", move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!([{"id": 1}, {"id": 2}]))
      })
      .await
      .unwrap();

    // Caller sees the stale value immediately.
    assert_eq!(out, json!([{"id": 1}]));

    // The refresh lands exactly once.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(
      cache.get_cached("accounts").unwrap(),
      Some(json!([{"id": 1}, {"id": 2}]))
    );
  }

  #[tokio::test]
  async fn offline_hit_skips_the_refresh() {
    let (_dir, cache) = cache(false);
    cache.set_cached("accounts", &json!([{"id": 1}])).unwrap();

    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fetches);
    let out = cache
      .get_with_cache("accounts", move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!([]))
      })
      .await
      .unwrap();

    assert_eq!(out, json!([{"id": 1}]));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn failed_refresh_leaves_cached_value_intact() {
    let (_dir, cache) = cache(true);
    cache.set_cached("accounts", &json!([{"id": 1}])).unwrap();

    let out = cache
      .get_with_cache("accounts", || async {
        Err(color_eyre::eyre::eyre!("network down"))
      })
      .await
      .unwrap();

    assert_eq!(out, json!([{"id": 1}]));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.get_cached("accounts").unwrap(), Some(json!([{"id": 1}])));
  }

  #[tokio::test]
  async fn invalidate_clears_whole_stores() {
    let (_dir, cache) = cache(true);
    cache.set_cached("accounts", &json!([{"id": 1}])).unwrap();
    cache.set_cached("categoryTree:income", &json!([{"id": 9}])).unwrap();
    cache.set_cached("defaultCurrency", &json!({"code": "USD"})).unwrap();

    cache
      .invalidate(&[CacheStore::Accounts, CacheStore::CategoryTrees])
      .unwrap();

    assert_eq!(cache.get_cached("accounts").unwrap(), None);
    assert_eq!(cache.get_cached("categoryTree:income").unwrap(), None);
    assert!(cache.get_cached("defaultCurrency").unwrap().is_some());
  }
}
