//! Per-call fan-out over the configured key set.
//!
//! [`FanOut::run_batch`] launches `count` concurrent [`CacheFill::resolve`]
//! invocations, each on a key drawn uniformly (with replacement) from the key
//! set, and hands back a [`Batch`] stream yielding resolutions in completion
//! order. Duplicate keys in a batch are expected; they contend on the same
//! store lock like invocations from any other batch would.
//!
//! Each batch owns a [`CancellationToken`] that reaches every origin fetch it
//! started. Cancelling it, or dropping the [`Batch`], unwinds in-flight work
//! promptly. Invocations that were cancelled send nothing.

use crate::{
    config::FillConfig,
    coordinator::{CacheFill, Outcome, Resolution},
    error::ConfigError,
    fetch::OriginFetcher,
    key::ResourceKey,
    store::CacheStore,
};
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use futures::Stream;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Launches batches of coordinator invocations.
pub struct FanOut<S, F> {
    coordinator: Arc<CacheFill<S, F>>,
    keys: Arc<[ResourceKey]>,
    count: usize,
}

impl<S, F> Clone for FanOut<S, F> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            keys: Arc::clone(&self.keys),
            count: self.count,
        }
    }
}

impl<S, F> FanOut<S, F>
where
    S: CacheStore,
    F: OriginFetcher,
{
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `keys` is empty or `count` is zero.
    pub fn new(
        coordinator: Arc<CacheFill<S, F>>,
        keys: Vec<ResourceKey>,
        count: usize,
    ) -> Result<Self, ConfigError> {
        if keys.is_empty() {
            return Err(ConfigError::invalid("fan-out needs at least one key"));
        }
        if count == 0 {
            return Err(ConfigError::invalid("fan-out count must be greater than 0"));
        }
        Ok(Self {
            coordinator,
            keys: keys.into(),
            count,
        })
    }

    /// Builds a fan-out over the config's key set and request count.
    ///
    /// # Errors
    ///
    /// See [`FanOut::new`].
    pub fn from_config(
        coordinator: Arc<CacheFill<S, F>>,
        config: &FillConfig,
    ) -> Result<Self, ConfigError> {
        Self::new(coordinator, config.keys(), config.number_of_requests)
    }

    pub const fn count(&self) -> usize {
        self.count
    }

    fn pick_key(&self) -> ResourceKey {
        let idx = rand::rng().random_range(0..self.keys.len());
        self.keys[idx].clone()
    }

    /// Starts one batch.
    ///
    /// Must be called from within a Tokio runtime: each invocation runs on
    /// its own spawned task so that invocations blocked on the store or the
    /// origin make progress in parallel.
    pub fn run_batch(&self, cancel: CancellationToken) -> Batch {
        // Sized so that no invocation ever waits on a slow consumer.
        let (tx, rx) = mpsc::channel(self.count);

        for _ in 0..self.count {
            let key = self.pick_key();
            let coordinator = Arc::clone(&self.coordinator);
            let cancel = cancel.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let resolution = coordinator.resolve(&key, &cancel).await;
                if resolution.outcome == Outcome::Cancelled {
                    return;
                }
                if tx.send(resolution).await.is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Batch dropped before `{}` resolved", key);
                }
            });
        }

        Batch {
            rx,
            remaining: self.count,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        }
    }
}

/// The results of one batch, in completion order.
///
/// Yields at most `count` resolutions and ends once every invocation has
/// finished. Dropping the batch cancels whatever is still running.
#[must_use = "a batch cancels its invocations when dropped"]
pub struct Batch {
    rx: mpsc::Receiver<Resolution>,
    remaining: usize,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl Batch {
    /// Cancels every invocation of this batch that has not resolved yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolutions not yet yielded.
    pub const fn remaining(&self) -> usize {
        self.remaining
    }
}

impl Stream for Batch {
    type Item = Resolution;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.remaining == 0 {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(resolution)) => {
                self.remaining -= 1;
                Poll::Ready(Some(resolution))
            }
            Poll::Ready(None) => {
                self.remaining = 0;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
