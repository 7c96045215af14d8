fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/fleetd.proto");
    tonic_prost_build::configure()
        .compile_protos(&["proto/fleetd.proto"], &["proto"])?;
    Ok(())
}
