//! Error types for the fillguard gRPC service.
//!
//! This module defines the central `Error` enum for failures at the service
//! layer. Resolution itself never fails (origin and store errors are absorbed
//! by the coordinator), so these cover only the plumbing around a call. It
//! implements `From<Error>` for `tonic::Status` so handlers can return them
//! directly.
//!
//! ## Error Cases
//! - `ChannelError`: forwarding a reply to the response stream failed.
//! - `RequestCancelled`: the client went away mid-stream.
//! - `ServiceShutdown`: a call arrived while the service was shutting down.
//! - `Store`: the cache store could not be reached at startup.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the fillguard service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The client aborted the request.
    #[error("Request cancelled by client")]
    RequestCancelled,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// The shared cache store is unavailable.
    #[error("Store error: {0}")]
    Store(#[from] fillguard::StoreError),
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::Store(e) => Status::unavailable(format!("Store unavailable: {e}")),
        }
    }
}
