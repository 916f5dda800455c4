//! Types shared between the service and its clients.
//!
//! - [`error`] - the service error type and its gRPC status mapping.

pub mod error;

pub use error::{Error, Result};
