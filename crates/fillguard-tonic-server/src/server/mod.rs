//! Server-side components of the fillguard gRPC service.
//!
//! - [`config`] - CLI/environment settings and the validated [`config::ServerConfig`].
//! - [`store`] - Selects the cache store backing the service.
//! - [`service`] - The `MessageBus` implementation and shutdown coordination.
//! - [`streaming`] - Forwards a batch's resolutions onto a response stream.
//! - [`telemetry`] - Logging, tracing and metrics initialization.

pub mod config;
pub mod service;
pub mod store;
pub mod streaming;
pub mod telemetry;

#[cfg(test)]
pub mod testing;
