//! Logical cache keys and their static mapping to physical stores.

use serde_json::Value;

/// Physical stores backing the read cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStore {
  Accounts,
  CategoryTrees,
  Currencies,
  DefaultCurrency,
  PrimaryAccount,
}

impl CacheStore {
  pub fn name(&self) -> &'static str {
    match self {
      CacheStore::Accounts => "accounts",
      CacheStore::CategoryTrees => "category_trees",
      CacheStore::Currencies => "currencies",
      CacheStore::DefaultCurrency => "default_currency",
      CacheStore::PrimaryAccount => "primary_account",
    }
  }
}

/// Well-known logical keys.
pub mod logical {
  pub const ACCOUNTS: &str = "accounts";
  pub const ACCOUNTS_ACTIVE: &str = "accounts:active";
  pub const CURRENCIES_TENANT: &str = "currencies:tenant";
  pub const DEFAULT_CURRENCY: &str = "defaultCurrency";
  pub const PRIMARY_ACCOUNT: &str = "primaryAccount";

  pub fn category_tree(tree_type: Option<&str>) -> String {
    match tree_type {
      Some(t) => format!("categoryTree:{}", t),
      None => "categoryTree".to_string(),
    }
  }
}

/// Resolve a logical key to its physical store.
///
/// The mapping is static and total for all recognized keys; an unmapped key
/// returns `None` and the caller bypasses caching rather than erroring.
pub fn resolve_store(key: &str) -> Option<CacheStore> {
  match key {
    logical::ACCOUNTS | logical::ACCOUNTS_ACTIVE => return Some(CacheStore::Accounts),
    "categoryTree" | "categories" => return Some(CacheStore::CategoryTrees),
    logical::CURRENCIES_TENANT => return Some(CacheStore::Currencies),
    logical::DEFAULT_CURRENCY => return Some(CacheStore::DefaultCurrency),
    logical::PRIMARY_ACCOUNT => return Some(CacheStore::PrimaryAccount),
    _ => {}
  }
  if key.starts_with("categoryTree:") || key.starts_with("categories:") {
    return Some(CacheStore::CategoryTrees);
  }
  None
}

/// Derive the physical record id from a cached payload.
///
/// Object payloads use their natural `id` (or `code`) so repeated writes to
/// the same logical key overwrite one row; everything else falls back to the
/// logical key itself.
pub fn record_id(data: &Value, fallback_key: &str) -> String {
  if let Value::Object(map) = data {
    for field in ["id", "code"] {
      match map.get(field) {
        Some(Value::String(s)) if !s.is_empty() => return s.clone(),
        Some(Value::Number(n)) => return n.to_string(),
        _ => {}
      }
    }
  }
  fallback_key.to_string()
}
