mod bluetooth;
mod config;
mod error;
mod metrics;
mod models;
mod registry;
#[cfg(test)]
mod test_utils;
mod utils;

use clap::Parser;
use log::{error, info};
use std::sync::Arc;

use bluetooth::adapter::BluerAdapter;
use bluetooth::scanner::{list_devices, ScanScheduler, ScanTiming};
use bluetooth::session::SessionSettings;
use config::SensorConfig;
use metrics::pushgateway::PushgatewayEmitter;
use models::SensorFamily;
use registry::SensorRegistry;

/// Push Mi thermometer and Flower care readings to a Prometheus push gateway
#[derive(Parser, Debug)]
#[command(version, about)]
struct Options {
    /// Log every ATC and Flower care device in range instead of pushing metrics
    #[arg(long)]
    list_devices: bool,
}

async fn main_loop(config: SensorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(SensorRegistry::from_config(&config));
    info!(
        "Starting sensor service: {} ATC, {} Flower care, pushing to {}",
        registry.len(SensorFamily::Atc),
        registry.len(SensorFamily::Flora),
        config.pushgateway_url
    );

    let emitter = Arc::new(PushgatewayEmitter::new(
        config.pushgateway_url.clone(),
        config.push_timeout,
    )?);
    let (adapter, discoveries) = BluerAdapter::new().await?;

    let timing = ScanTiming {
        interval: config.scan_interval,
        window: config.scan_window,
    };
    let session_settings = SessionSettings {
        interval: config.session_interval,
        connect_timeout: config.connect_timeout,
        operation_timeout: config.operation_timeout,
        max_consecutive_failures: config.max_consecutive_failures,
    };

    let mut scheduler = ScanScheduler::new(
        Arc::new(adapter),
        discoveries,
        registry,
        emitter,
        timing,
        session_settings,
    );
    scheduler.run().await?;
    Ok(())
}

async fn list_loop() -> Result<(), Box<dyn std::error::Error>> {
    let (adapter, discoveries) = BluerAdapter::new().await?;
    list_devices(Arc::new(adapter), discoveries).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    let options = Options::parse();

    // Load configuration, not needed for listing devices
    let config = if options.list_devices {
        None
    } else {
        match SensorConfig::new() {
            Ok(config) => Some(config),
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                return Err(e.into());
            }
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let service = async move {
        match config {
            Some(config) => main_loop(config).await,
            None => list_loop().await,
        }
    };

    // Run the service or wait for shutdown signal
    tokio::select! {
        result = service => {
            match result {
                Ok(_) => info!("Program completed successfully"),
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        Ok(()) = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
