use crate::error::StoreError;
use core::time::Duration;

/// The three primitives the cache-fill protocol needs from a shared
/// key/value store.
///
/// Implementations must make [`set_if_absent`](CacheStore::set_if_absent)
/// atomic across every process sharing the store: mutual exclusion between
/// populators rests entirely on it. No other guarantee (transactions,
/// pub/sub, explicit deletion) is assumed.
///
/// Futures are required to be `Send` so invocations can run on a
/// multi-threaded runtime.
pub trait CacheStore: Send + Sync + 'static {
    /// Returns the value stored under `key`, or `None` if it is absent or
    /// expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Stores `value` under `key`, replacing any previous value, expiring
    /// after `ttl`.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stores `value` under `key` only if no live value exists.
    ///
    /// Returns `Ok(true)` if this call created the entry and `Ok(false)` if
    /// an entry was already present.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
