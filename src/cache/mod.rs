//! Read cache for reference data.
//!
//! Serves a durable local snapshot immediately and refreshes it in the
//! background when online (stale-while-revalidate). Logical keys resolve
//! statically to physical stores; unrecognized keys bypass caching instead
//! of failing the read.

mod keys;
mod layer;
mod store;

pub use keys::{logical, record_id, resolve_store, CacheStore};
pub use layer::ReadCache;
pub use store::{CachedValue, ReadCacheStore};
