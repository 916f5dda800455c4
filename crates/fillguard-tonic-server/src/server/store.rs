use crate::server::config::{ServerConfig, StoreKind};
use core::time::Duration;
use fillguard::{CacheStore, MemoryStore, RedisStore, StoreError};

/// The cache store selected at startup.
#[derive(Debug)]
pub enum SharedStore {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl SharedStore {
    /// Builds the store named by `config.store`.
    ///
    /// For Redis this connects eagerly so that a misconfigured URL fails
    /// startup instead of every later resolution.
    pub async fn connect(config: &ServerConfig) -> Result<Self, StoreError> {
        match config.store {
            StoreKind::Memory => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Using the in-memory store; fills are only coordinated within this process");
                Ok(Self::Memory(MemoryStore::new()))
            }
            StoreKind::Redis => Ok(Self::Redis(RedisStore::connect(&config.redis_url).await?)),
        }
    }
}

impl CacheStore for SharedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Self::Memory(store) => store.get(key).await,
            Self::Redis(store) => store.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.set(key, value, ttl).await,
            Self::Redis(store) => store.set(key, value, ttl).await,
        }
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self {
            Self::Memory(store) => store.set_if_absent(key, value, ttl).await,
            Self::Redis(store) => store.set_if_absent(key, value, ttl).await,
        }
    }
}
