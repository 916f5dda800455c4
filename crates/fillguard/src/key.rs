//! Resource keys and the store keys derived from them.
//!
//! Every resource owns two entries in the shared store: the cached value and
//! the population lock. Both are derived by a [`KeySpace`] from the same
//! [`ResourceKey`], each under its own prefix, so the two families never
//! overlap. A resource key that happens to look like `lock:...` still maps to
//! `<ns>:cache:lock:...`, which no lock key can ever equal.

use core::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Default namespace prepended to every derived store key.
pub const DEFAULT_NAMESPACE: &str = "fillguard";

const CACHE_SEGMENT: &str = "cache";
const LOCK_SEGMENT: &str = "lock";

/// Opaque identifier of a fetchable resource. In practice a URL.
///
/// Cloning is cheap: the key is shared between every invocation that selects
/// it within and across batches.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Derives cache and lock keys for resources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySpace {
    cache_prefix: String,
    lock_prefix: String,
}

impl KeySpace {
    pub fn new(namespace: &str) -> Self {
        Self {
            cache_prefix: format!("{namespace}:{CACHE_SEGMENT}:"),
            lock_prefix: format!("{namespace}:{LOCK_SEGMENT}:"),
        }
    }

    /// Store key holding the cached value (payload or failure description).
    pub fn cache_key(&self, key: &ResourceKey) -> String {
        let mut out = String::with_capacity(self.cache_prefix.len() + key.as_str().len());
        out.push_str(&self.cache_prefix);
        out.push_str(key.as_str());
        out
    }

    /// Store key whose presence means "someone is populating this resource".
    pub fn lock_key(&self, key: &ResourceKey) -> String {
        let mut out = String::with_capacity(self.lock_prefix.len() + key.as_str().len());
        out.push_str(&self.lock_prefix);
        out.push_str(key.as_str());
        out
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

/// Identifier minted once per coordinator invocation.
///
/// It is written as the lock value so that an operator inspecting the store
/// can tell which invocation holds a lock. It plays no part in deciding
/// ownership: only the result of the atomic set-if-absent does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}
