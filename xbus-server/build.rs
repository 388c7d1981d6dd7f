fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/xbus/orchestrator.proto",
                "proto/xbus/recipient.proto",
                "proto/xbus/front.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}
