// build.rs
//! Build script for compiling the control channel Protocol Buffer definitions

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fall back to the vendored protoc when the host does not provide one
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/fleet.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/fleet.proto");

    Ok(())
}
