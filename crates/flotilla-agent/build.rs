use std::path::PathBuf;

fn build_proto() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("flotilla_descriptor.bin");
    tonic_build::configure()
        .file_descriptor_set_path(&descriptor_path)
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/flotilla/messages.proto",
                "proto/flotilla/master.proto",
                "proto/flotilla/agent.proto",
                "proto/flotilla/executor.proto",
                "proto/flotilla/framework.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto");
    build_proto()?;
    Ok(())
}
