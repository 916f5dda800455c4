//! Bridges a [`fillguard::Batch`] onto a gRPC response stream.
//!
//! - [`forwarder`] - drains a batch into the response channel, cancelling it
//!   when the client goes away.

pub mod forwarder;
