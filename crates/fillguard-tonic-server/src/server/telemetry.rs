//! Logging, tracing and metrics for the server.
//!
//! Console logging through `tracing-subscriber` is always on and filtered by
//! `RUST_LOG` (default `info`).
//!
//! With the `tracing` or `metrics` features, spans and metrics are also
//! exported over OTLP/gRPC to `--otlp-endpoint`. Without an endpoint the
//! providers are still installed, so instrumentation stays cheap and
//! uniform, but nothing leaves the process.
//!
//! Exported data carries the store kind and key namespace on its resource:
//! replicas that coordinate through the same store share both, which is how
//! their resolution counts are meant to be summed.
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//!     cargo run --features tracing,metrics
//! ```

use crate::server::config::ServerConfig;
use core::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(any(feature = "metrics", feature = "tracing"))]
use anyhow::Context;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::KeyValue;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_otlp::WithExportConfig;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics::SdkMeterProvider;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Name of the service resource and of the tracer/meter scopes.
#[cfg(any(feature = "metrics", feature = "tracing"))]
const SERVICE_NAME: &str = "fillguard";

#[cfg(any(feature = "metrics", feature = "tracing"))]
const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Installed OpenTelemetry providers. Call [`Telemetry::shutdown`] once the
/// server has stopped so buffered spans and metrics are flushed.
pub struct Telemetry {
    #[cfg(feature = "tracing")]
    tracer_provider: SdkTracerProvider,
    #[cfg(feature = "metrics")]
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    /// Installs the global subscriber and, per enabled feature, the tracer
    /// and meter providers.
    ///
    /// # Errors
    ///
    /// Fails if an OTLP exporter cannot be built for the configured endpoint.
    #[cfg_attr(
        not(any(feature = "metrics", feature = "tracing")),
        allow(unused_variables, clippy::unnecessary_wraps)
    )]
    pub fn init(config: &ServerConfig) -> anyhow::Result<Self> {
        let registry = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .pretty(),
            );

        #[cfg(any(feature = "metrics", feature = "tracing"))]
        let resource = resource(config);

        #[cfg(feature = "tracing")]
        let (registry, tracer_provider) = {
            use opentelemetry::trace::TracerProvider as _;

            opentelemetry::global::set_text_map_propagator(
                opentelemetry_sdk::propagation::TraceContextPropagator::new(),
            );
            let provider = tracer_provider(config, resource.clone())?;
            opentelemetry::global::set_tracer_provider(provider.clone());
            let layer = tracing_opentelemetry::layer()
                .with_tracer(provider.tracer(SERVICE_NAME))
                .with_error_records_to_exceptions(true);
            (registry.with(layer), provider)
        };

        #[cfg(feature = "metrics")]
        let meter_provider = {
            let provider = meter_provider(config, resource)?;
            opentelemetry::global::set_meter_provider(provider.clone());
            let meter = opentelemetry::global::meter(SERVICE_NAME);
            let _ = METRICS.set(Metrics::new(&meter, config));
            provider
        };

        registry.init();

        Ok(Self {
            #[cfg(feature = "tracing")]
            tracer_provider,
            #[cfg(feature = "metrics")]
            meter_provider,
        })
    }

    /// Flushes and stops the exporters.
    ///
    /// Failures go to stderr: the subscriber that would log them is backed by
    /// the providers being shut down.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter provider: {err:#?}");
            }
        }
    }
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource(config: &ServerConfig) -> Resource {
    use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;

    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_attributes([
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new("fillguard.store", config.store.as_str()),
            KeyValue::new("fillguard.key_namespace", config.key_namespace.clone()),
        ])
        .build()
}

#[cfg(feature = "tracing")]
fn tracer_provider(config: &ServerConfig, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
    let builder = SdkTracerProvider::builder().with_resource(resource);
    let Some(endpoint) = &config.otlp_endpoint else {
        return Ok(builder.build());
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.as_str())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .with_context(|| format!("building the span exporter for `{endpoint}`"))?;

    Ok(builder.with_batch_exporter(exporter).build())
}

#[cfg(feature = "metrics")]
fn meter_provider(config: &ServerConfig, resource: Resource) -> anyhow::Result<SdkMeterProvider> {
    let builder = SdkMeterProvider::builder().with_resource(resource);
    let Some(endpoint) = &config.otlp_endpoint else {
        return Ok(builder.build());
    };

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.as_str())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .with_context(|| format!("building the metric exporter for `{endpoint}`"))?;

    Ok(builder.with_periodic_exporter(exporter).build())
}

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Metrics> = OnceLock::new();

#[cfg(feature = "metrics")]
struct Metrics {
    requests: Counter<u64>,
    streams_inflight: UpDownCounter<i64>,
    stream_errors: Counter<u64>,
    stream_duration: Histogram<f64>,
    values_streamed: Counter<u64>,
    resolutions: Counter<u64>,
    /// Attached to resolutions so hit ratios can be compared per store.
    store: KeyValue,
}

#[cfg(feature = "metrics")]
impl Metrics {
    fn new(meter: &Meter, config: &ServerConfig) -> Self {
        Self {
            requests: meter
                .u64_counter("fillguard.requests")
                .with_description("GetRandomDataStream calls accepted")
                .build(),
            streams_inflight: meter
                .i64_up_down_counter("fillguard.streams_inflight")
                .with_description("Response streams currently open")
                .build(),
            stream_errors: meter
                .u64_counter("fillguard.stream_errors")
                .with_description("Calls refused or streams ended early")
                .build(),
            stream_duration: meter
                .f64_histogram("fillguard.stream_duration")
                .with_unit("ms")
                .with_description("Time from call to last reply")
                .build(),
            values_streamed: meter
                .u64_counter("fillguard.values_streamed")
                .with_description("Replies written to response streams")
                .build(),
            resolutions: meter
                .u64_counter("fillguard.resolutions")
                .with_description("Resolutions forwarded, by outcome")
                .build(),
            store: KeyValue::new("store", config.store.as_str()),
        }
    }
}

#[cfg(feature = "metrics")]
fn with_metrics(record: impl FnOnce(&Metrics)) {
    if let Some(metrics) = METRICS.get() {
        record(metrics);
    }
}

// The hooks below are no-ops until `Telemetry::init` ran with `metrics` on.

pub fn increment_requests() {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.requests.add(1, &[]));
}

pub fn increment_streams_inflight() {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.streams_inflight.add(1, &[]));
}

pub fn decrement_streams_inflight() {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.streams_inflight.add(-1, &[]));
}

pub fn increment_stream_errors() {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.stream_errors.add(1, &[]));
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn record_stream_duration(elapsed: Duration) {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.stream_duration.record(elapsed.as_secs_f64() * 1_000.0, &[]));
}

pub fn increment_values_streamed() {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.values_streamed.add(1, &[]));
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn record_resolution(outcome: &'static str) {
    #[cfg(feature = "metrics")]
    with_metrics(|m| {
        m.resolutions
            .add(1, &[KeyValue::new("outcome", outcome), m.store.clone()]);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_are_inert_before_init() {
        increment_requests();
        increment_streams_inflight();
        decrement_streams_inflight();
        increment_stream_errors();
        record_stream_duration(Duration::from_millis(12));
        increment_values_streamed();
        record_resolution("cached");
    }
}
