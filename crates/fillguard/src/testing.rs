//! Store and fetcher doubles shared by the unit tests.

use crate::{
    error::{FetchError, StoreError},
    fetch::OriginFetcher,
    store::{CacheStore, MemoryStore},
};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Wraps a [`MemoryStore`], recording every write and optionally injecting
/// failures.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    pub reads: AtomicUsize,
    pub lock_attempts: AtomicUsize,
    pub lock_wins: AtomicUsize,
    /// `(key, ttl)` of every plain `set`.
    pub writes: Mutex<Vec<(String, Duration)>>,
    /// When set, every `get` fails.
    pub fail_reads: AtomicBool,
    /// Number of upcoming `set_if_absent` calls that fail.
    pub fail_locks: AtomicUsize,
    /// When set, every `set` fails.
    pub fail_writes: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn lock_attempts(&self) -> usize {
        self.lock_attempts.load(Ordering::SeqCst)
    }

    pub fn lock_wins(&self) -> usize {
        self.lock_wins.load(Ordering::SeqCst)
    }

    pub fn write_ttls(&self) -> Vec<Duration> {
        self.writes.lock().iter().map(|(_, ttl)| *ttl).collect()
    }
}

impl CacheStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("read refused".into()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("write refused".into()));
        }
        self.writes.lock().push((key.to_owned(), ttl));
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.lock_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_locks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Connection("lock refused".into()));
        }
        let won = self.inner.set_if_absent(key, value, ttl).await?;
        if won {
            self.lock_wins.fetch_add(1, Ordering::SeqCst);
        }
        Ok(won)
    }
}

/// An origin that answers after a fixed latency and tracks concurrency.
pub struct ScriptedFetcher {
    latency: Duration,
    failing: bool,
    pub calls: AtomicUsize,
    pub cancelled: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failing: false,
            calls: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing(latency: Duration) -> Self {
        Self {
            failing: true,
            ..Self::new(latency)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn body_for(url: &str) -> String {
        format!("body of {url}")
    }
}

impl OriginFetcher for ScriptedFetcher {
    async fn fetch(&self, cancel: &CancellationToken, url: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Cancelled { url: url.to_owned() })
            }
            () = tokio::time::sleep(self.latency) => {
                if self.failing {
                    Err(FetchError::Request {
                        url: url.to_owned(),
                        reason: "connection refused".to_owned(),
                    })
                } else {
                    Ok(Self::body_for(url))
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
