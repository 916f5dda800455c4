/// Builds the gRPC client and server code for the `fillguard.proto`
/// definition using `tonic-prost-build`.
///
/// Also writes the encoded file descriptor set to
/// `OUT_DIR/fillguard_descriptor.bin` so the server can expose it through
/// gRPC reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/fillguard.proto`
/// - Includes: `proto/`
///
/// # Panics
///
/// Panics if `OUT_DIR` is unset or code generation fails, which aborts the
/// build with the generator's message.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("fillguard_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    println!("cargo:rerun-if-changed=proto/fillguard.proto");

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/fillguard.proto"], &["proto"])
        .unwrap();
}
