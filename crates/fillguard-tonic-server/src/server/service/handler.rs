//! gRPC service implementation for streaming cached origin content.
//!
//! This module defines [`FillService`], the implementation of the
//! [`MessageBus`] service. Every `GetRandomDataStream` call runs one fan-out
//! batch and streams its values back as they resolve.
//!
//! ## Responsibilities
//!
//! - Launch a [`FanOut`] batch per call, scoped to a child of the service's
//!   shutdown token.
//! - Forward resolutions to the client via [`forward_batch`].
//! - Track in-flight streams and coordinate graceful shutdown.

use crate::server::{
    store::SharedStore,
    streaming::forwarder::forward_batch,
    telemetry::{
        decrement_streams_inflight, increment_requests, increment_stream_errors,
        increment_streams_inflight, record_stream_duration,
    },
};
use core::{pin::Pin, time::Duration};
use fillguard::{CacheStore, FanOut, HttpFetcher, OriginFetcher};
use fillguard_tonic_core::{
    Error,
    proto::{Reply, Request as DataRequest, message_bus_server::MessageBus},
};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shutdown flag, in-flight stream count and the root cancellation token
/// shared by every clone of a [`FillService`].
#[derive(Debug, Default)]
pub struct ServiceState {
    shutting_down: AtomicBool,
    streams_inflight: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl ServiceState {
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn streams_inflight(&self) -> usize {
        self.streams_inflight.load(Ordering::Acquire)
    }
}

/// Counts one stream as in flight for as long as it lives.
struct InflightGuard(Arc<ServiceState>);

impl InflightGuard {
    fn new(state: Arc<ServiceState>) -> Self {
        state.streams_inflight.fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        Self(state)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.streams_inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}

/// Streams `count` cache-filled resources per call.
///
/// Cheap to clone; clones share the fan-out, the store and the shutdown
/// state.
pub struct FillService<S = SharedStore, F = HttpFetcher> {
    fan_out: FanOut<S, F>,
    state: Arc<ServiceState>,
    stream_buffer_size: usize,
    shutdown_timeout: Duration,
}

impl<S, F> Clone for FillService<S, F> {
    fn clone(&self) -> Self {
        Self {
            fan_out: self.fan_out.clone(),
            state: Arc::clone(&self.state),
            stream_buffer_size: self.stream_buffer_size,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

impl<S, F> FillService<S, F>
where
    S: CacheStore,
    F: OriginFetcher,
{
    pub fn new(fan_out: FanOut<S, F>, stream_buffer_size: usize, shutdown_timeout: Duration) -> Self {
        Self {
            fan_out,
            state: Arc::default(),
            stream_buffer_size,
            shutdown_timeout,
        }
    }

    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    /// Gracefully shuts the service down.
    ///
    /// New calls are refused immediately. In-flight streams get up to the
    /// configured shutdown timeout to finish on their own; whatever is still
    /// running afterwards is cancelled, which aborts its origin fetches and
    /// ends its stream with `UNAVAILABLE`.
    pub async fn shutdown(&self) {
        self.state.shutting_down.store(true, Ordering::Release);
        #[cfg(feature = "tracing")]
        tracing::info!(
            streams = self.state.streams_inflight(),
            timeout = ?self.shutdown_timeout,
            "Refusing new calls, draining open streams"
        );

        let drained = timeout(self.shutdown_timeout, async {
            while self.state.streams_inflight() > 0 {
                sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                streams = self.state.streams_inflight(),
                "Drain timed out, cancelling open streams"
            );
        }

        // Every batch token is a child of this one.
        self.state.shutdown_token.cancel();
    }
}

#[tonic::async_trait]
impl<S, F> MessageBus for FillService<S, F>
where
    S: CacheStore,
    F: OriginFetcher,
{
    type GetRandomDataStreamStream = Pin<Box<dyn Stream<Item = Result<Reply, Status>> + Send>>;

    /// Streams one value per fan-out invocation, in completion order.
    ///
    /// If `metrics` is enabled, emits telemetry for request rate, concurrent
    /// stream count, stream duration, stream errors, values streamed and
    /// resolutions by outcome.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(count = self.fan_out.count())))]
    async fn get_random_data_stream(
        &self,
        _req: Request<DataRequest>,
    ) -> Result<Response<Self::GetRandomDataStreamStream>, Status> {
        if self.state.is_shutting_down() {
            increment_stream_errors();
            return Err(Error::ServiceShutdown.into());
        }

        let start = std::time::Instant::now();
        increment_requests();
        let guard = InflightGuard::new(Arc::clone(&self.state));

        let (resp_tx, resp_rx) = mpsc::channel::<Result<Reply, Status>>(self.stream_buffer_size);
        let batch = self.fan_out.run_batch(self.state.shutdown_token.child_token());

        let fut = async move {
            let _guard = guard;
            match forward_batch(batch, resp_tx).await {
                Ok(_sent) => {
                    record_stream_duration(start.elapsed());
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Streamed {} values", _sent);
                }
                Err(_e) => {
                    increment_stream_errors();
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Stream ended early: {}", _e);
                }
            }
        };
        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            fut.instrument(tracing::info_span!("streaming"))
        };

        tokio::spawn(fut);

        Ok(Response::new(Box::pin(ReceiverStream::new(resp_rx))))
    }
}
