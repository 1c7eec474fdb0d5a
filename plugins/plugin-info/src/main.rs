//! Serves [`InfoPlugin`] on a fixed address for a host to connect to.
//!
//! ```bash
//! cargo run --bin plugin-info -- 127.0.0.1:7400
//! ```

use anyhow::Result;
use bridge_plugin_sdk::bridge_core::TcpBroker;
use bridge_plugin_sdk::PluginServer;
use plugin_info::InfoPlugin;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_ADDRESS: &str = "127.0.0.1:7400";

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());

    let broker = Arc::new(TcpBroker::default());
    let server = PluginServer::new(Arc::new(InfoPlugin::default()), broker.clone());
    let endpoint = broker.serve_on(&address, server.into_methods()).await?;

    info!("plugin-info listening on {}", endpoint.location);
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    endpoint.stop();
    Ok(())
}
