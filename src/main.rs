use anyhow::Result;
use log::{error, info};
use std::time::Duration;
use tokio::sync::broadcast;

use growatt_bridge::prelude::Options;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    // Create a channel for shutdown signaling
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C, and the optional runtime limit
    let runtime = options.runtime;
    tokio::spawn(async move {
        let limit = async {
            match runtime {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                if let Err(e) = r {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
            }
            _ = limit => info!("runtime limit reached"),
        }

        if let Err(e) = shutdown_tx.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    });

    growatt_bridge::app(shutdown_rx, options).await
}
