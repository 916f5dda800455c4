#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use fillguard::{CacheFill, FanOut, HttpFetcher};
use fillguard_tonic_core::proto::{FILE_DESCRIPTOR_SET, message_bus_server::MessageBusServer};
use futures::Stream;
use server::{
    config::{CliArgs, ServerConfig},
    service::handler::FillService,
    store::SharedStore,
    telemetry::Telemetry,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{
    codec::CompressionEncoding,
    transport::{Server, server::Connected},
};
use tonic_health::server::HealthReporter;
use tower_http::cors::CorsLayer;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Offered and accepted on the `MessageBus` service, in preference order.
const ENCODINGS: [CompressionEncoding; 3] = [
    CompressionEncoding::Zstd,
    CompressionEncoding::Gzip,
    CompressionEncoding::Deflate,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ServerConfig::try_from(CliArgs::parse())?;

    let telemetry = Telemetry::init(&config)?;
    let service = build_service(&config).await?;

    #[cfg(feature = "tracing")]
    tracing::debug!("Resolved configuration: {:#?}", config);
    #[cfg(feature = "tracing")]
    tracing::info!(
        addr = %config.server_addr,
        store = config.store.as_str(),
        resources = config.fill.urls.len(),
        per_call = config.fill.number_of_requests,
        "Starting fillguard"
    );

    if config.uds {
        serve_uds(&config.server_addr, service, telemetry).await
    } else {
        let listener = tokio::net::TcpListener::bind(&config.server_addr)
            .await
            .with_context(|| format!("binding `{}`", config.server_addr))?;
        serve(TcpListenerStream::new(listener), service, telemetry).await
    }
}

async fn build_service(config: &ServerConfig) -> anyhow::Result<FillService> {
    let store = SharedStore::connect(config)
        .await
        .map_err(fillguard_tonic_core::Error::from)
        .context("connecting to the cache store")?;
    let fetcher =
        HttpFetcher::with_timeout(config.origin_timeout).context("building the origin client")?;

    let coordinator = CacheFill::new(Arc::new(store), Arc::new(fetcher), config.policy)
        .with_key_space(config.key_space.clone());
    let fan_out = FanOut::from_config(Arc::new(coordinator), &config.fill)?;

    Ok(FillService::new(
        fan_out,
        config.stream_buffer_size,
        config.shutdown_timeout,
    ))
}

#[cfg(unix)]
async fn serve_uds(path: &str, service: FillService, telemetry: Telemetry) -> anyhow::Result<()> {
    use tokio_stream::wrappers::UnixListenerStream;

    let listener =
        tokio::net::UnixListener::bind(path).with_context(|| format!("binding `{path}`"))?;
    let result = serve(UnixListenerStream::new(listener), service, telemetry).await;
    // Best effort; a panic can still leave the socket file behind.
    let _ = std::fs::remove_file(path);
    result
}

#[cfg(not(unix))]
async fn serve_uds(_path: &str, _service: FillService, _telemetry: Telemetry) -> anyhow::Result<()> {
    anyhow::bail!("Unix domain sockets are not supported on this platform")
}

/// Serves `MessageBus` plus health and reflection until a termination
/// signal has been handled, then flushes telemetry.
async fn serve<I, IO, IE>(
    incoming: I,
    service: FillService,
    telemetry: Telemetry,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health, health_service) = tonic_health::server::health_reporter();
    health.set_serving::<MessageBusServer<FillService>>().await;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let message_bus = ENCODINGS
        .into_iter()
        .fold(MessageBusServer::new(service.clone()), |server, encoding| {
            server.send_compressed(encoding).accept_compressed(encoding)
        });

    // Browsers reach the service through gRPC-Web, from any origin.
    let web = tower::ServiceBuilder::new()
        .layer(CorsLayer::permissive())
        .layer(tonic_web::GrpcWebLayer::new());

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(web)
        .add_service(health_service)
        .add_service(reflection)
        .add_service(message_bus)
        .serve_with_incoming_shutdown(incoming, drain_on_signal(service, health))
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down");
    telemetry.shutdown();
    Ok(())
}

/// Waits for a termination signal, then takes the service out of rotation
/// and drains it. The server stops accepting connections once this returns.
async fn drain_on_signal(service: FillService, health: HealthReporter) {
    let _signal = termination_signal().await;
    #[cfg(feature = "tracing")]
    tracing::info!("Received {}, shutting down", _signal);

    health
        .set_not_serving::<MessageBusServer<FillService>>()
        .await;
    service.shutdown().await;
}

/// Resolves with the name of the first termination signal received. A
/// handler that cannot be installed never fires.
async fn termination_signal() -> &'static str {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl+C",
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install Ctrl+C handler: {}", _e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM"
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {}", _e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    }
}
