/// Regenerates `src/eventbus.v1.rs` from the proto definition.
///
/// The generated module is committed so that building the crate does not require `protoc`.
/// Set `SALESFORCE_PUBSUB_REGENERATE=1` to rebuild it after changing the proto.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=SALESFORCE_PUBSUB_REGENERATE");
    println!("cargo:rerun-if-changed=proto/pubsub_api.proto");

    if std::env::var_os("SALESFORCE_PUBSUB_REGENERATE").is_none() {
        return Ok(());
    }

    tonic_prost_build::configure()
        .build_server(false)
        .out_dir("src")
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos(&["proto/pubsub_api.proto"], &["proto"])?;
    Ok(())
}
