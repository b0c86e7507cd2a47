//! Content-addressed, TTL-bound cache for provider outputs.

pub mod key;
pub mod store;

pub use key::cache_key;
pub use store::{CacheStats, CacheStore};
