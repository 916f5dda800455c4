//! gRPC service implementation and shutdown coordination.
//!
//! - [`handler`] - gRPC service entry point ([`handler::FillService`]).

pub mod handler;
