use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use platewatch_core::{logging, Config};
use platewatch_fleet::FleetService;

/// LPR fleet connection and relay service
#[derive(Debug, Parser)]
#[command(name = "platewatch", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "PLATEWATCH_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = Config::load(cli.config.as_deref())?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("PlateWatch fleet service starting...");

    // 4. Start the fleet service
    let service = FleetService::new(&config.fleet)
        .map_err(|e| anyhow::anyhow!("Failed to start fleet service: {e}"))?;

    // 5. Register configured devices. A misconfigured device is logged
    // and skipped; it must not prevent the others from connecting.
    for device in config.devices.clone() {
        let device_id = device.id.clone();
        if let Err(e) = service.register_device(device.into()).await {
            error!(device_id = %device_id, error = %e, "Skipping device");
        }
    }
    info!(
        devices = service.device_count(),
        "Device supervisors started"
    );

    // 6. Run until shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    service.shutdown().await;

    Ok(())
}
