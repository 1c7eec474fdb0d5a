//! # bridge-host
//!
//! Runs a host event hub and bridges it to one out-of-process extension.
//!
//! ## Running
//!
//! ```bash
//! # Start the extension first, then the host
//! cargo run --bin plugin-info
//! cargo run --bin bridge-host
//!
//! # With an explicit config file and debug logging
//! RUST_LOG=debug cargo run --bin bridge-host -- ./host.toml
//! ```
//!
//! Once running, type lines on stdin to simulate host events (`/help` lists
//! the console commands).

use anyhow::{Context, Result};
use bridge_core::{
    Broadcast, BridgeTimeouts, ChatEvent, CommandSpec, FrameExitEvent, HandlerKind, TcpBroker,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bridge_host::adapter::HostEventAdapter;
use bridge_host::client::PluginClient;
use bridge_host::config::HostConfig;
use bridge_host::console::{parse_line, ConsoleInput};
use bridge_host::hub::EventHub;
use bridge_host::services::StaticHostServices;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration: explicit path argument, else the default location
    let config = match std::env::args().nth(1) {
        Some(path) => HostConfig::load(&path)?,
        None => HostConfig::load_default().unwrap_or_else(|e| {
            eprintln!("Failed to load config, using defaults: {:#}", e);
            HostConfig::default()
        }),
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.host.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting bridge-host v{}", env!("CARGO_PKG_VERSION"));

    let hub = Arc::new(EventHub::new());
    let services = Arc::new(StaticHostServices::from_config(&config.identity));
    let broker = Arc::new(TcpBroker::new(config.host.bind_address.clone()));
    let adapter = Arc::new(HostEventAdapter::new(
        config.extension.name.clone(),
        Arc::clone(&hub),
        services,
        config.timeouts,
    ));

    register_help(&hub)?;

    // Handshake with the extension
    let mut client = PluginClient::connect(&config.extension.endpoint, broker, config.timeouts)
        .with_context(|| format!("Invalid extension endpoint {}", config.extension.endpoint))?;

    match client.info().await {
        Ok(info) => info!("Extension: {} v{} - {}", info.name, info.version, info.description),
        Err(e) => warn!("Extension did not describe itself: {}", e),
    }

    let report = client
        .init(Arc::clone(&adapter))
        .await
        .with_context(|| format!("Extension at {} failed to initialize", client.location()))?;
    for (callback_id, e) in &report.failed {
        warn!(callback_id = %callback_id, "Registration dropped: {}", e);
    }
    info!(
        "Activated {} handler(s) from {}",
        report.applied.len(),
        config.extension.name
    );

    client.start().await.context("Extension failed to start")?;
    hub.emit_preload().await;
    hub.emit_active().await;

    info!("Host ready; type /help for commands, Ctrl+C to stop");
    run_console(&hub, config.timeouts).await?;

    info!("Shutting down...");
    hub.emit_frame_exit(FrameExitEvent {
        signal: "interrupt".to_string(),
        reason: "operator requested shutdown".to_string(),
    })
    .await;

    if let Err(e) = client.stop().await {
        error!("Extension stop failed: {}", e);
    }

    info!("Host stopped");
    Ok(())
}

fn register_help(hub: &Arc<EventHub>) -> Result<()> {
    let commands = Arc::downgrade(hub);
    hub.add_console_command(
        CommandSpec::new("help")
            .with_triggers(["help", "?"])
            .with_description("List console commands"),
        move |_args| {
            let commands = commands.clone();
            async move {
                if let Some(hub) = commands.upgrade() {
                    for spec in hub.console_commands() {
                        println!(
                            "  {:<20} {} {}",
                            spec.triggers.join("/"),
                            spec.usage,
                            spec.description
                        );
                    }
                }
                Ok(())
            }
        },
    )
    .map_err(anyhow::Error::msg)?;
    Ok(())
}

/// Feed stdin lines into the hub until EOF or Ctrl+C.
async fn run_console(hub: &Arc<EventHub>, timeouts: BridgeTimeouts) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else { break };

        let input = match parse_line(&line) {
            Ok(input) => input,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match input {
            ConsoleInput::Empty => {}
            ConsoleInput::Command(command) => {
                let budget = timeouts.for_kind(&HandlerKind::ConsoleCommand);
                match tokio::time::timeout(budget, hub.run_console_command(&command)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(message)) => println!("{}", message),
                    Err(_) => println!("command timed out"),
                }
            }
            ConsoleInput::Chat { sender, message } => {
                let event = hub.emit_chat(ChatEvent::new(sender, message)).await;
                if event.cancelled {
                    println!("(suppressed) <{}> {}", event.sender, event.message);
                } else {
                    println!("<{}> {}", event.sender, event.message);
                }
            }
            ConsoleInput::Broadcast { name, data } => {
                let results = hub.broadcast(Broadcast::new(name, data)).await;
                let count = results.len();
                println!("{} response(s): {}", count, Value::Array(results));
            }
            ConsoleInput::Packet(packet) => hub.emit_packet(packet).await,
            ConsoleInput::Join(event) => hub.emit_player_join(event).await,
            ConsoleInput::Leave(event) => hub.emit_player_leave(event).await,
        }
    }

    Ok(())
}
