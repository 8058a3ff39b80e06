pub mod channels;
pub mod command;
pub mod config;
pub mod controls;
pub mod coordinator;
pub mod entity_store;
pub mod error;
pub mod home_assistant;
pub mod inverter;
pub mod metrics;
pub mod mirror;
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod snapshot;

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::coordinator::Coordinator;
use crate::inverter::{InverterClient, Poller};
use crate::mqtt::Mqtt;
use crate::prelude::*;

fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
}

/// Runs every component until `shutdown_rx` fires, then stops them in order
/// and prints the statistics.
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, options: Options) -> Result<()> {
    // the log level comes from the config, so read it before logging is up
    let config = match Config::new(options.config_file.clone()) {
        Ok(config) => config,
        Err(err) => {
            init_logging("info");
            error!("Failed to load config: {:?}", err);
            return Err(err);
        }
    };

    init_logging(&config.loglevel);
    info!("growatt-bridge {} starting with config file: {}", CARGO_PKG_VERSION, options.config_file);
    config.log_summary();
    let config = ConfigWrapper::from_config(config);

    let channels = Channels::new();
    let inverter = config.inverter();
    let client = InverterClient::new(&inverter)?;

    info!("Initializing components...");

    info!("  Creating Coordinator...");
    let mut coordinator = Coordinator::new(config.clone(), channels.clone(), client.clone());
    let stats = coordinator.stats.clone();
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator.start().await {
            error!("Coordinator task failed: {}", e);
        }
    });

    info!("  Creating MQTT client...");
    let mqtt = Mqtt::new(config.clone(), channels.clone(), stats.clone());
    let mqtt_clone = mqtt.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start().await {
            error!("MQTT task failed: {}", e);
        }
    });

    info!("  Creating Poller...");
    let mut poller = Poller::new(client, inverter.poll_config());
    let poller_channels = channels.clone();
    let interval = inverter.poll_interval();
    let poller_handle = tokio::spawn(async move {
        if let Err(e) = poller.start(poller_channels, interval).await {
            error!("Poller task failed: {}", e);
        }
    });

    info!("Waiting for shutdown signal...");
    let _ = shutdown_rx.recv().await;

    info!("Shutdown signal received, stopping components...");
    // poller first so no new snapshots arrive while the rest winds down
    let _ = channels.to_poller.send(inverter::ChannelData::Shutdown);
    let _ = channels.to_coordinator.send(coordinator::ChannelData::Shutdown);
    let _ = channels.from_mqtt.send(mqtt::ChannelData::Shutdown);
    let _ = mqtt.stop().await;

    if let Err(e) = poller_handle.await {
        error!("Error waiting for poller task: {}", e);
    }
    if let Err(e) = coordinator_handle.await {
        error!("Error waiting for coordinator task: {}", e);
    }
    if let Err(e) = mqtt_handle.await {
        error!("Error waiting for mqtt task: {}", e);
    }

    if let Ok(stats) = stats.lock() {
        stats.print_summary();
    }

    info!("Application shutdown complete");
    Ok(())
}
