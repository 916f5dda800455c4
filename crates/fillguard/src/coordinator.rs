//! The single-resource cache-fill protocol.
//!
//! [`CacheFill::resolve`] decides, for one resource key, whether to serve the
//! cached value, become the sole populator, or wait for another populator to
//! finish. It runs a bounded loop:
//!
//! 1. Read the cache entry. A hit returns immediately with
//!    [`Outcome::Cached`] and never touches the lock.
//! 2. On a miss, try to create the lock entry with an atomic set-if-absent
//!    and a short expiry. Whoever creates it fetches from the origin, writes
//!    the result (payload or failure description) with a randomized TTL and
//!    returns [`Outcome::Populated`].
//! 3. Otherwise back off and start over. After `max_attempts` rounds the
//!    invocation gives up with an empty value and [`Outcome::TimedOut`].
//!
//! Store failures never abort a resolution. A failed read counts as a miss
//! and a failed lock attempt counts as "someone else holds it", so a flaky
//! store degrades into extra retries rather than unchecked origin traffic.
//!
//! The lock is never deleted. Its expiry is the only release, which bounds
//! how long a populator that died mid-fetch can wedge the resource.

use crate::{
    config::FillPolicy,
    fetch::OriginFetcher,
    key::{KeySpace, LockToken, ResourceKey},
    store::CacheStore,
};
use core::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a resolution obtained its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Served from a live cache entry.
    Cached,
    /// This invocation held the lock and wrote the entry.
    Populated,
    /// Every attempt found the lock held and the cache empty.
    TimedOut,
    /// The caller cancelled before a value was obtained.
    Cancelled,
}

impl Outcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Populated => "populated",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value a resolution produced and how it got it.
///
/// `value` is empty for [`Outcome::TimedOut`] and [`Outcome::Cancelled`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub value: String,
    pub outcome: Outcome,
}

impl Resolution {
    const fn empty(outcome: Outcome) -> Self {
        Self {
            value: String::new(),
            outcome,
        }
    }
}

/// Coordinates cache population for individual resource keys.
///
/// The store and fetcher are injected, shared handles. `CacheFill` itself
/// holds no per-key state, so a single instance serves any number of
/// concurrent invocations.
pub struct CacheFill<S, F> {
    store: Arc<S>,
    fetcher: Arc<F>,
    keys: KeySpace,
    policy: FillPolicy,
}

impl<S, F> CacheFill<S, F>
where
    S: CacheStore,
    F: OriginFetcher,
{
    pub fn new(store: Arc<S>, fetcher: Arc<F>, policy: FillPolicy) -> Self {
        Self {
            store,
            fetcher,
            keys: KeySpace::default(),
            policy,
        }
    }

    #[must_use]
    pub fn with_key_space(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    pub const fn policy(&self) -> &FillPolicy {
        &self.policy
    }

    pub const fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    /// Resolves `key` to a value.
    ///
    /// Never fails: origin errors come back as cached content, and store
    /// errors and lock contention turn into retries bounded by
    /// `max_attempts`. `cancel` is handed to the origin fetch and also cuts
    /// the backoff short.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(key = %key)))]
    pub async fn resolve(&self, key: &ResourceKey, cancel: &CancellationToken) -> Resolution {
        let token = LockToken::mint().to_string();
        let cache_key = self.keys.cache_key(key);
        let lock_key = self.keys.lock_key(key);

        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                return Resolution::empty(Outcome::Cancelled);
            }

            match self.store.get(&cache_key).await {
                Ok(Some(value)) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(attempt, "Cache hit");
                    return Resolution {
                        value,
                        outcome: Outcome::Cached,
                    };
                }
                Ok(None) => {}
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, "Cache read failed, treating as miss: {_e}");
                }
            }

            match self
                .store
                .set_if_absent(&lock_key, &token, self.policy.lock_ttl)
                .await
            {
                Ok(true) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, lock = %token, "Acquired fill lock");
                    return self.populate(key, &cache_key, cancel).await;
                }
                Ok(false) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(attempt, "Fill lock held elsewhere, waiting");
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, "Lock attempt failed, backing off: {_e}");
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Resolution::empty(Outcome::Cancelled),
                    () = tokio::time::sleep(self.policy.backoff) => {}
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            attempts = self.policy.max_attempts,
            "Gave up waiting for another populator"
        );
        Resolution::empty(Outcome::TimedOut)
    }

    /// Runs the origin fetch as lock holder and caches whatever it produced.
    async fn populate(
        &self,
        key: &ResourceKey,
        cache_key: &str,
        cancel: &CancellationToken,
    ) -> Resolution {
        let value = match self.fetcher.fetch(cancel, key.as_str()).await {
            Ok(payload) => payload,
            // A cancelled fetch says nothing about the origin; leave the
            // entry absent and let the lock expire.
            Err(e) if e.is_cancelled() => return Resolution::empty(Outcome::Cancelled),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Caching origin failure: {e}");
                e.to_string()
            }
        };

        let ttl = self.policy.ttl.sample();
        if let Err(_e) = self.store.set(cache_key, &value, ttl).await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to cache populated value: {_e}");
        }

        Resolution {
            value,
            outcome: Outcome::Populated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TtlRange,
        store::MemoryStore,
        testing::{RecordingStore, ScriptedFetcher},
    };
    use core::time::Duration;
    use std::{collections::HashSet, sync::atomic::Ordering};

    fn policy() -> FillPolicy {
        FillPolicy::new(TtlRange::from_millis(60_000, 120_000).unwrap())
    }

    fn fill<S: CacheStore, F: OriginFetcher>(
        store: &Arc<S>,
        fetcher: &Arc<F>,
        policy: FillPolicy,
    ) -> CacheFill<S, F> {
        CacheFill::new(Arc::clone(store), Arc::clone(fetcher), policy)
    }

    #[tokio::test]
    async fn cached_value_is_served_without_touching_the_lock() {
        let store = Arc::new(RecordingStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::ZERO));
        let coordinator = fill(&store, &fetcher, policy());
        let key = ResourceKey::from("https://example.com/a");

        store
            .inner
            .set(
                &coordinator.key_space().cache_key(&key),
                "warm",
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        for _ in 0..10 {
            let res = coordinator.resolve(&key, &CancellationToken::new()).await;
            assert_eq!(res.outcome, Outcome::Cached);
            assert_eq!(res.value, "warm");
        }
        assert_eq!(store.reads(), 10);
        assert_eq!(store.lock_attempts(), 0);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn populated_value_is_served_from_cache_afterwards() {
        let store = Arc::new(RecordingStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::ZERO));
        let coordinator = fill(&store, &fetcher, policy());
        let key = ResourceKey::from("https://example.com/a");

        let first = coordinator.resolve(&key, &CancellationToken::new()).await;
        assert_eq!(first.outcome, Outcome::Populated);
        assert_eq!(first.value, ScriptedFetcher::body_for(key.as_str()));

        let second = coordinator.resolve(&key, &CancellationToken::new()).await;
        assert_eq!(second.outcome, Outcome::Cached);
        assert_eq!(second.value, first.value);

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(store.lock_attempts(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_cold_resolutions_elect_a_single_populator() {
        const K: usize = 16;

        let store = Arc::new(RecordingStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_millis(400)));
        let coordinator = Arc::new(fill(&store, &fetcher, policy()));
        let key = ResourceKey::from("https://example.com/contested");

        let tasks: Vec<_> = (0..K)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let key = key.clone();
                tokio::spawn(async move { coordinator.resolve(&key, &CancellationToken::new()).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(K);
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }

        assert_eq!(store.lock_wins(), 1);
        assert!(store.lock_attempts() > 1);
        assert_eq!(fetcher.calls(), 1);

        let populated = outcomes
            .iter()
            .filter(|r| r.outcome == Outcome::Populated)
            .count();
        assert_eq!(populated, 1);
        assert!(outcomes
            .iter()
            .all(|r| r.value == ScriptedFetcher::body_for(key.as_str())));
    }

    #[tokio::test(start_paused = true)]
    async fn ttls_are_randomized_within_bounds() {
        let ttl = TtlRange::from_millis(10, 40).unwrap();
        let store = Arc::new(RecordingStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::ZERO));
        let coordinator = fill(
            &store,
            &fetcher,
            FillPolicy::new(ttl).with_lock_ttl(Duration::from_millis(5)),
        );
        let key = ResourceKey::from("https://example.com/a");

        for _ in 0..200 {
            let res = coordinator.resolve(&key, &CancellationToken::new()).await;
            assert_eq!(res.outcome, Outcome::Populated);
            // Past both the entry and the lock expiry.
            tokio::time::advance(ttl.max() + Duration::from_millis(1)).await;
        }

        let ttls = store.write_ttls();
        assert_eq!(ttls.len(), 200);
        assert!(ttls.iter().all(|t| *t >= ttl.min() && *t <= ttl.max()));

        let distinct: HashSet<_> = ttls.iter().collect();
        assert!(distinct.len() > 10, "only {} distinct TTLs", distinct.len());
    }

    #[tokio::test(start_paused = true)]
    async fn origin_failures_are_cached_as_content() {
        let store = Arc::new(RecordingStore::new());
        let fetcher = Arc::new(ScriptedFetcher::failing(Duration::ZERO));
        let coordinator = fill(&store, &fetcher, policy());
        let key = ResourceKey::from("https://example.com/down");

        let first = coordinator.resolve(&key, &CancellationToken::new()).await;
        assert_eq!(first.outcome, Outcome::Populated);
        assert_eq!(
            first.value,
            "Get \"https://example.com/down\": connection refused"
        );

        let second = coordinator.resolve(&key, &CancellationToken::new()).await;
        assert_eq!(second.outcome, Outcome::Cached);
        assert_eq!(second.value, first.value);
        assert_eq!(fetcher.calls(), 1);

        // The failure text only lives as long as any other cached value.
        tokio::time::advance(policy().ttl.max()).await;
        let third = coordinator.resolve(&key, &CancellationToken::new()).await;
        assert_eq!(third.outcome, Outcome::Populated);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_while_lock_is_held() {
        let store = Arc::new(RecordingStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::ZERO));
        let coordinator = fill(&store, &fetcher, policy());
        let key = ResourceKey::from("https://example.com/a");

        let held = store
            .inner
            .set_if_absent(
                &coordinator.key_space().lock_key(&key),
                "someone-else",
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
        assert!(held);

        let res = coordinator.resolve(&key, &CancellationToken::new()).await;
        assert_eq!(res.outcome, Outcome::TimedOut);
        assert!(res.value.is_empty());
        assert_eq!(store.lock_attempts(), coordinator.policy().max_attempts);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_of_a_dead_populator_is_taken_over() {
        let store = Arc::new(RecordingStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::ZERO));
        let coordinator = fill(&store, &fetcher, policy());
        let key = ResourceKey::from("https://example.com/a");

        // A holder that never writes the cache entry.
        store
            .inner
            .set_if_absent(
                &coordinator.key_space().lock_key(&key),
                "crashed",
                Duration::from_millis(120),
            )
            .await
            .unwrap();

        let res = coordinator.resolve(&key, &CancellationToken::new()).await;
        assert_eq!(res.outcome, Outcome::Populated);
        assert_eq!(fetcher.calls(), 1);
        // 0, 50 and 100 ms find the lock; 150 ms takes it.
        assert_eq!(store.lock_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn store_errors_fail_open_into_retries() {
        let store = Arc::new(RecordingStore::new());
        store.fail_reads.store(true, Ordering::SeqCst);
        store.fail_locks.store(3, Ordering::SeqCst);
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::ZERO));
        let coordinator = fill(&store, &fetcher, policy());
        let key = ResourceKey::from("https://example.com/a");

        let res = coordinator.resolve(&key, &CancellationToken::new()).await;
        assert_eq!(res.outcome, Outcome::Populated);
        assert_eq!(store.lock_attempts(), 4);
        assert_eq!(store.lock_wins(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_store_times_out() {
        let store = Arc::new(RecordingStore::new());
        store.fail_reads.store(true, Ordering::SeqCst);
        store.fail_locks.store(usize::MAX, Ordering::SeqCst);
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::ZERO));
        let coordinator = fill(&store, &fetcher, policy().with_max_attempts(5));

        let res = coordinator
            .resolve(&ResourceKey::from("k"), &CancellationToken::new())
            .await;
        assert_eq!(res.outcome, Outcome::TimedOut);
        assert_eq!(store.lock_attempts(), 5);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn failed_cache_write_still_returns_the_value() {
        let store = Arc::new(RecordingStore::new());
        store.fail_writes.store(true, Ordering::SeqCst);
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::ZERO));
        let coordinator = fill(&store, &fetcher, policy());
        let key = ResourceKey::from("https://example.com/a");

        let res = coordinator.resolve(&key, &CancellationToken::new()).await;
        assert_eq!(res.outcome, Outcome::Populated);
        assert_eq!(res.value, ScriptedFetcher::body_for(key.as_str()));
    }

    #[tokio::test]
    async fn cancelled_fetch_is_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_secs(30)));
        let coordinator = Arc::new(fill(&store, &fetcher, policy()));
        let key = ResourceKey::from("https://example.com/slow");
        let cancel = CancellationToken::new();

        let task = {
            let coordinator = Arc::clone(&coordinator);
            let key = key.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.resolve(&key, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let res = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("resolution did not unwind")
            .unwrap();
        assert_eq!(res.outcome, Outcome::Cancelled);
        assert!(res.value.is_empty());
        assert_eq!(fetcher.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(
            store
                .get(&coordinator.key_space().cache_key(&key))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn cancellation_cuts_the_backoff_short() {
        let store = Arc::new(RecordingStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::ZERO));
        let coordinator = fill(
            &store,
            &fetcher,
            policy().with_backoff(Duration::from_secs(30)),
        );
        let key = ResourceKey::from("https://example.com/a");
        store
            .inner
            .set_if_absent(
                &coordinator.key_space().lock_key(&key),
                "someone-else",
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let res = tokio::time::timeout(Duration::from_secs(1), coordinator.resolve(&key, &cancel))
            .await
            .expect("backoff was not interrupted");
        assert_eq!(res.outcome, Outcome::Cancelled);
    }
}
