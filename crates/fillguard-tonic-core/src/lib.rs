#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can reach the library through
// `fillguard_tonic_core::fillguard`.
pub use fillguard;

/// gRPC service and message definitions generated from
/// `proto/fillguard.proto`.
///
/// - [`message_bus_server::MessageBus`] - server trait for the
///   `GetRandomDataStream` call.
/// - [`message_bus_client::MessageBusClient`] - generated client.
/// - [`Request`] / [`Reply`] - empty request, one string per resolved value.
pub mod proto {
    tonic::include_proto!("fillguard");

    /// Encoded descriptor set, served through gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("fillguard_descriptor");
}
