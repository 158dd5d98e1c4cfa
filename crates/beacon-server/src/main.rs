//! # Beacon Server
//!
//! Message broker with publish/subscribe, request/reply and embedded
//! key/value and document storage.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with a config file
//! beacon /path/to/beacon.toml
//!
//! # Run with environment variables
//! BEACON_PORT=4100 BEACON_STORAGE_PATH=/var/lib/beacon/data.redb beacon
//! ```

mod config;
mod dispatch;
mod metrics;
mod server;
mod storage;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "beacon_server=info,beacon_core=info,beacon_store=info,beacon_transport=info".into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args().nth(1);
    let config = config::Config::load(path.as_deref())?;

    info!("Starting Beacon server on {}:{}", config.host, config.port);

    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let server = server::Server::bind(config).await?;
    info!(
        storage = %server.state().config.storage_path().display(),
        "Storage ready"
    );

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            shutdown.cancel();
        }
    });

    server.run().await
}
