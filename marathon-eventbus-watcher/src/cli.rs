use clap::{Parser, Subcommand};

/// The main CLI structure for the Marathon event bus watcher.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Subscribe to the event bus and log every accepted event until Ctrl+C.
    Run(RunCmd),
    /// Print the event types the watcher can subscribe to.
    EventTypes,
}

/// Arguments for the `run` subcommand. Flags override the configuration file.
#[derive(Parser, Debug, Default)]
pub struct RunCmd {
    /// Path to the watcher configuration TOML file.
    /// If not provided, default values will be used.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Marathon host, e.g. `master.mesos` or `localhost`.
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// An event type to subscribe to. Repeat for several.
    #[arg(short = 'e', long = "event-type")]
    pub event_types: Vec<String>,

    /// Also publish the `connectionId` pseudo event.
    #[arg(long)]
    pub connection_event: bool,
}
