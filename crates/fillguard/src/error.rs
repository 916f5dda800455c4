//! Error types for the cache-fill library.
//!
//! None of these escape a resolution. The coordinator absorbs them:
//!
//! - [`StoreError`]: transient store failures. A failed read counts as a miss
//!   and a failed lock attempt counts as "lock held".
//! - [`FetchError`]: origin failures. The `Display` text becomes cached
//!   content, except for [`FetchError::Cancelled`] which is never cached.
//! - [`ConfigError`]: rejected startup configuration.

/// Failure talking to the shared cache store.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (connect, I/O, or protocol failure).
    #[error("store connection error: {0}")]
    Connection(String),

    /// The store answered, but rejected the command.
    #[error("store command error: {0}")]
    Command(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

/// Failure retrieving a resource from the origin.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum FetchError {
    /// The request could not be built or sent, or the response body could
    /// not be read.
    #[error("Get \"{url}\": {reason}")]
    Request { url: String, reason: String },

    /// The origin did not answer within the configured timeout.
    #[error("Get \"{url}\": request timed out")]
    Timeout { url: String },

    /// The batch this fetch belongs to was cancelled.
    #[error("Get \"{url}\": request cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// The startup configuration is unusable.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}
