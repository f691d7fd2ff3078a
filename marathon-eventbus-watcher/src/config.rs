use anyhow::{Context, Result};
use marathon_eventbus_connector::ClientOptions;
use marathon_eventbus_logger::LogConfig;
use serde::Deserialize;

use crate::cli::RunCmd;

/// Environment variables with this prefix override file settings. Nested
/// keys are joined with `__` and word breaks use `_`, e.g.
/// `MARATHON_EVENTBUS__CONNECTOR__MARATHON_HOST=localhost` or
/// `MARATHON_EVENTBUS__LOG__LEVEL=debug`.
pub const ENV_PREFIX: &str = "MARATHON_EVENTBUS";

/// The top-level configuration for the watcher.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct WatcherConfig {
    #[serde(default)]
    pub connector: ClientOptions,
    #[serde(default)]
    pub log: LogConfig,
}

impl WatcherConfig {
    /// Applies command line overrides on top of the loaded configuration.
    pub fn apply_cli(&mut self, cmd: &RunCmd) {
        if let Some(host) = &cmd.host {
            self.connector.marathon_host = Some(host.clone());
        }
        if let Some(port) = cmd.port {
            self.connector.marathon_port = Some(port);
        }
        if !cmd.event_types.is_empty() {
            self.connector.event_types = cmd.event_types.clone();
        }
        if cmd.connection_event {
            self.connector.enable_connection_event = true;
        }
    }
}

/// The environment source, mapping `snake_case` variable names onto the
/// kebab-case keys of the configuration.
pub fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .convert_case(config::Case::Kebab)
}

/// Loads the watcher configuration from an optional TOML file, overlaid by
/// environment variables.
pub fn load_config(path: Option<&str>) -> Result<WatcherConfig> {
    build_config(path, environment())
}

fn build_config(path: Option<&str>, env: config::Environment) -> Result<WatcherConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    }

    let settings: WatcherConfig = builder
        .add_source(env)
        .build()
        .context(format!(
            "Failed to build configuration from '{}'",
            path.unwrap_or("<environment>")
        ))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}
