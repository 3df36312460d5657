//! BambuLink - Main Entry Point
//!
//! Connects to the configured broker, subscribes to the device report
//! topic, and runs until SIGINT or SIGTERM.

use std::process;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};

use bambulink::error::sanitize_error_message;
use bambulink::observability::init_default_logging;
use bambulink::{BambuClient, Config, MqttTransport, Telemetry};

#[tokio::main]
async fn main() {
    init_default_logging();

    info!("Starting bambulink v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run().await {
        error!("Fatal error: {}", sanitize_error_message(&e.to_string()));
        process::exit(1);
    }

    info!("Shutdown complete");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    info!(
        device_type = %config.device.device_type,
        device_id = %config.device.id,
        "Configuration loaded"
    );

    let telemetry = Arc::new(Telemetry::init(&config.telemetry)?);

    let transport = MqttTransport::new(&config.device, &config.credentials)?;
    let mut client = BambuClient::new(config.device.clone(), telemetry.clone(), transport);

    client.connect().await?;
    client.subscribe(&config.device.report_topic()).await?;

    info!("Client is running and waiting for device reports...");

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    if let Err(e) = client.disconnect().await {
        warn!("Error during disconnect: {}", e);
    }

    // Flush any spans still buffered in the batch processor.
    telemetry.shutdown()?;

    Ok(())
}
