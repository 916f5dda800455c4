use crate::{error::StoreError, store::CacheStore};
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// An in-process [`CacheStore`] with passive expiry.
///
/// All three primitives run under a single mutex, which makes
/// [`set_if_absent`](CacheStore::set_if_absent) atomic for every task in the
/// process. Expired entries are dropped lazily when touched.
///
/// Expiry follows [`tokio::time::Instant`], so tests running with a paused
/// clock can advance time to expire entries deterministically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let live = entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());
        if live.is_none() {
            entries.remove(key);
        }
        Ok(live)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let entry = Entry {
            value: value.to_owned(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().insert(key.to_owned(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }
}
