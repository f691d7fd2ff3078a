pub mod cli;
pub mod config;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::{load_config, WatcherConfig};
use marathon_eventbus_connector::{
    bus::{ERROR, SUBSCRIBED, UNSUBSCRIBED},
    events::{ALLOWED_EVENT_TYPES, ALLOWLIST_VERSION},
    EventBusClient, Notification,
};
use tokio::signal;

/// The main entry point for running the watcher.
/// This function handles CLI parsing, configuration, and the subscription.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_cmd) => {
            let mut config = load_config_from_cli(&run_cmd)?;
            config.apply_cli(&run_cmd);
            marathon_eventbus_logger::init(&config.log)?;
            tracing::info!("Configuration loaded: {:#?}", &config);
            run_watcher(config).await
        }
        Commands::EventTypes => {
            println!("# Marathon event types ({})", ALLOWLIST_VERSION);
            for event_type in ALLOWED_EVENT_TYPES {
                println!("{}", event_type);
            }
            Ok(())
        }
    }
}

/// Loads the watcher configuration based on the provided CLI command.
fn load_config_from_cli(run_cmd: &cli::RunCmd) -> Result<WatcherConfig> {
    match &run_cmd.config {
        Some(config_path) => println!("Loading configuration from '{}'", config_path),
        None => println!("No config file provided, using defaults and environment."),
    }
    load_config(run_cmd.config.as_deref())
}

/// Builds a client that logs every notification it receives.
pub fn build_client(config: &WatcherConfig) -> EventBusClient {
    let client = EventBusClient::new(config.connector.clone());

    client.on(SUBSCRIBED, |notification| {
        if let Notification::Subscribed { timestamp } = notification {
            tracing::info!(%timestamp, "Subscribed to the Marathon event bus");
        }
    });
    client.on(UNSUBSCRIBED, |_| {
        tracing::info!("Unsubscribed from the Marathon event bus");
    });
    client.on(ERROR, |notification| {
        if let Notification::Error { timestamp, error } = notification {
            tracing::warn!(%timestamp, error = %error, "Event bus error");
        }
    });

    for kind in &client.settings().requested_kinds {
        client.on(kind.clone(), |notification| {
            if let Some(event) = notification.event() {
                tracing::info!(kind = %event.kind, payload = %event.data, "Caught event");
            }
        });
    }

    client
}

/// Subscribes and runs until Ctrl+C, then unsubscribes.
async fn run_watcher(config: WatcherConfig) -> Result<()> {
    let client = build_client(&config);
    if client.settings().requested_kinds.is_empty() {
        tracing::warn!("None of the configured event types is known; only lifecycle signals will be logged.");
    }

    client
        .subscribe()
        .context("Failed to subscribe to the Marathon event bus")?;

    match signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to listen for shutdown signal.");
        }
    }

    client.unsubscribe().await?;
    tracing::info!("Shutdown complete.");
    Ok(())
}
