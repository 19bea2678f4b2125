use std::sync::Arc;

use relaybus::broker::Broker;
use relaybus::config::load_config;
use relaybus::utils::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.logging.level);

    let broker = Arc::new(Broker::with_settings(config.broker));
    info!("relaybus broker running; press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown signal received. Closing broker.");

    let closing = Arc::clone(&broker);
    if let Err(e) = tokio::task::spawn_blocking(move || closing.close()).await {
        error!("Broker shutdown failed: {e}");
    }
}
