//! Startup configuration and the parameters of the cache-fill protocol.
//!
//! [`FillConfig`] is the immutable input supplied at startup: the key set, the
//! cache TTL bounds, and the per-call fan-out. It is read from YAML using the
//! same field names the service has always used:
//!
//! ```yaml
//! URLs:
//!   - https://example.com/a
//!   - https://example.com/b
//! MinTimeout: 1000   # milliseconds
//! MaxTimeout: 5000   # milliseconds
//! NumberOfRequests: 5
//! ```
//!
//! [`FillPolicy`] carries the knobs of the lock protocol itself (attempt cap,
//! backoff, lock expiry) together with the [`TtlRange`] cache entries are
//! written with.

use crate::{error::ConfigError, key::ResourceKey};
use core::time::Duration;
use rand::Rng;
use serde::Deserialize;
use std::path::Path;

/// Attempts a coordinator invocation makes before giving up with a timeout.
pub const DEFAULT_MAX_ATTEMPTS: usize = 20;

/// Pause between attempts while another invocation holds the lock.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

/// Expiry of a lock entry. Must stay below the origin request timeout so that
/// a populator that dies mid-fetch releases the resource on its own.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(2);

/// Immutable startup configuration of a fill deployment.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FillConfig {
    /// Resource identifiers (URLs) a batch selects from.
    #[serde(rename = "URLs")]
    pub urls: Vec<String>,

    /// Lower bound of the cache entry TTL, in milliseconds.
    #[serde(rename = "MinTimeout")]
    pub min_timeout_ms: u64,

    /// Upper bound of the cache entry TTL, in milliseconds.
    #[serde(rename = "MaxTimeout")]
    pub max_timeout_ms: u64,

    /// Coordinator invocations launched per inbound call.
    #[serde(rename = "NumberOfRequests")]
    pub number_of_requests: usize,
}

impl FillConfig {
    /// Reads and validates a YAML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, and the
    /// errors of [`FillConfig::from_yaml_str`] otherwise.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed YAML and
    /// [`ConfigError::Invalid`] when [`FillConfig::validate`] rejects it.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants every other component relies on.
    ///
    /// # Errors
    ///
    /// - the key set is empty or contains an empty key
    /// - `MinTimeout` is zero or greater than `MaxTimeout`
    /// - `NumberOfRequests` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::invalid("URLs must not be empty"));
        }
        if let Some(idx) = self.urls.iter().position(|url| url.trim().is_empty()) {
            return Err(ConfigError::invalid(format!("URLs[{idx}] is empty")));
        }
        if self.number_of_requests == 0 {
            return Err(ConfigError::invalid(
                "NumberOfRequests must be greater than 0",
            ));
        }
        TtlRange::from_millis(self.min_timeout_ms, self.max_timeout_ms)?;
        Ok(())
    }

    /// The configured key set, in configuration order.
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.urls.iter().map(|url| ResourceKey::from(url.as_str())).collect()
    }

    /// The cache TTL bounds.
    ///
    /// # Errors
    ///
    /// Same bound checks as [`TtlRange::from_millis`].
    pub fn ttl_range(&self) -> Result<TtlRange, ConfigError> {
        TtlRange::from_millis(self.min_timeout_ms, self.max_timeout_ms)
    }
}

/// Inclusive range cache entry lifetimes are drawn from.
///
/// Each write samples independently so that entries populated at the same
/// moment do not expire at the same moment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlRange {
    min_ms: u64,
    max_ms: u64,
}

impl TtlRange {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] unless `0 < min_ms <= max_ms`.
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Result<Self, ConfigError> {
        if min_ms == 0 {
            return Err(ConfigError::invalid("MinTimeout must be greater than 0"));
        }
        if min_ms > max_ms {
            return Err(ConfigError::invalid(format!(
                "MinTimeout ({min_ms}) exceeds MaxTimeout ({max_ms})"
            )));
        }
        Ok(Self { min_ms, max_ms })
    }

    pub const fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub const fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    /// Draws a TTL uniformly from `[min, max]` at millisecond granularity.
    pub fn sample(&self) -> Duration {
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }
}

/// Parameters of the lock-acquire/poll/populate protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
    pub lock_ttl: Duration,
    pub ttl: TtlRange,
}

impl FillPolicy {
    /// Default protocol parameters with the given cache TTL bounds.
    pub const fn new(ttl: TtlRange) -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
            lock_ttl: DEFAULT_LOCK_TTL,
            ttl,
        }
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if no attempt would ever be made or
    /// the lock would never expire.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max attempts must be greater than 0"));
        }
        if self.lock_ttl.is_zero() {
            return Err(ConfigError::invalid("lock TTL must be greater than 0"));
        }
        Ok(())
    }
}
