//! textsync relay server.
//!
//! Configuration comes from `TEXTSYNC_*` environment variables (optionally
//! via `.env`): `TEXTSYNC_HOST`, `TEXTSYNC_PORT`, `TEXTSYNC_MAX_FRAME_BYTES`,
//! `TEXTSYNC_LOG_LEVEL`. `RUST_LOG` overrides the log level.

mod config;

use log::{error, info, warn};
use textsync_collab::server::SyncServer;

use config::RelayConfig;

#[tokio::main]
async fn main() {
    let loaded = RelayConfig::load();
    let level = loaded
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("Starting textsync relay...");

    let config = loaded.unwrap_or_else(|e| {
        error!("Failed to load configuration: {e}");
        warn!("Using default configuration");
        RelayConfig::default()
    });

    let server = SyncServer::new(config.server_config());
    if let Err(e) = server.run().await {
        error!("Relay on {} stopped: {e}", config.server_address());
        std::process::exit(1);
    }
}
