fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Server stubs are only used by the mock agent in integration tests.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(&["proto/agent.proto"], &["proto"])?;
    Ok(())
}
