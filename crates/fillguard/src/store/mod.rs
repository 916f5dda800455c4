//! Shared cache store abstraction and its implementations.
//!
//! - [`CacheStore`] - the `get` / `set` / `set_if_absent` contract.
//! - [`MemoryStore`] - in-process store with passive expiry.
//! - [`RedisStore`] - Redis-backed store (feature `redis`).

mod interface;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use interface::*;
pub use memory::*;
#[cfg(feature = "redis")]
pub use redis::*;
