use anyhow::{Context, Result};
use deep_motor_can::can::{self, BusOptions, CanBus};
use deep_motor_can::{run_control_loop, ControllerConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("deep_motor_can=debug,info")),
        )
        .init();

    let config = ControllerConfig::from_env().context("Invalid configuration")?;
    info!("Configuration: {:?}", config);

    if config.setup_interface {
        can::configure_interface(&config.interface, config.bitrate, config.use_sudo)?;
    } else if !can::is_interface_up(&config.interface).unwrap_or(false) {
        warn!(
            "Interface {} is not up; set DEEP_MOTOR_SETUP_INTERFACE=true to configure it",
            config.interface
        );
    }

    let mut bus = CanBus::open(&config.interface, BusOptions::from(&config))?;

    run_control_loop(&mut bus, &config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}
