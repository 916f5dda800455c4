use crate::{error::StoreError, store::CacheStore};
use core::time::Duration;
use redis::{Client, aio::MultiplexedConnection};

/// A [`CacheStore`] backed by Redis.
///
/// Uses a single multiplexed connection shared by every invocation; cloning
/// the handle per command is cheap. Expiries are sent with millisecond
/// precision (`PX`), and `set_if_absent` maps to `SET key value NX PX ttl`,
/// which Redis executes atomically.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://localhost:6379/0`) and verifies the
    /// server answers `PING`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the URL is invalid, the connection fails,
    /// or the server does not answer `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!("Connected to redis store");

        Ok(Self { conn })
    }
}

impl core::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

fn expiry_millis(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry.
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(expiry_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // `SET NX` replies `OK` when it wrote the key and nil otherwise.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(expiry_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}
