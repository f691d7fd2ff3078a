#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    channel::ChannelEndpoint,
    events::{is_allowed, CONNECTION_ID_EVENT, DEFAULT_EVENT_TYPES},
};
use std::{collections::BTreeMap, fmt, time::Duration};

pub const DEFAULT_MARATHON_HOST: &str = "master.mesos";
pub const DEFAULT_MARATHON_PORT: u16 = 8080;
pub const DEFAULT_MARATHON_PROTOCOL: &str = "http";
pub const DEFAULT_MARATHON_PATH: &str = "/v2/events";
pub const DEFAULT_UNSUBSCRIBE_GRACE_MS: u64 = 100;

/// The options an `EventBusClient` is constructed from.
///
/// Every field is optional; absent or empty values fall back to the in-cluster
/// defaults (`http://master.mesos:8080/v2/events`, deployment events only).
/// The struct is typically deserialized from a configuration file and turned
/// into [`Settings`] once, when the client is built.
#[derive(Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct ClientOptions {
    pub marathon_host: Option<String>,
    pub marathon_port: Option<u16>,
    pub marathon_protocol: Option<String>,
    pub marathon_path: Option<String>,
    /// Sent with every channel request, e.g. `Authorization: token=...` when
    /// connecting from outside the cluster.
    pub headers: BTreeMap<String, String>,
    /// Requested event types. Unknown types are dropped silently.
    pub event_types: Vec<String>,
    /// Adds the `connectionId` pseudo event type.
    pub enable_connection_event: bool,
    /// Disables TLS certificate verification. Only meant for internal
    /// infrastructure with self-signed certificates.
    pub accept_invalid_certs: bool,
    /// Delay between announcing `unsubscribed` and closing the channel.
    pub unsubscribe_grace_ms: Option<u64>,
}

/// The effective, immutable configuration derived from [`ClientOptions`].
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    /// Accepted event types in request order, without duplicates.
    pub requested_kinds: Vec<String>,
    pub accept_invalid_certs: bool,
    pub unsubscribe_grace: Duration,
}

impl Settings {
    /// Normalizes raw options into effective settings. Never fails: anything
    /// unusable is replaced by its default or dropped.
    pub fn from_options(options: &ClientOptions) -> Self {
        let mut requested_kinds: Vec<String> = Vec::new();
        if options.event_types.is_empty() {
            requested_kinds.extend(DEFAULT_EVENT_TYPES.iter().map(|t| t.to_string()));
        } else {
            for event_type in &options.event_types {
                if !is_allowed(event_type) {
                    tracing::debug!(event_type = %event_type, "Ignoring unknown event type");
                    continue;
                }
                if !requested_kinds.contains(event_type) {
                    requested_kinds.push(event_type.clone());
                }
            }
        }

        if options.enable_connection_event {
            requested_kinds.push(CONNECTION_ID_EVENT.to_string());
        }

        Self {
            host: non_empty_or(&options.marathon_host, DEFAULT_MARATHON_HOST),
            port: options
                .marathon_port
                .filter(|port| *port != 0)
                .unwrap_or(DEFAULT_MARATHON_PORT),
            protocol: non_empty_or(&options.marathon_protocol, DEFAULT_MARATHON_PROTOCOL),
            path: non_empty_or(&options.marathon_path, DEFAULT_MARATHON_PATH),
            headers: options.headers.clone(),
            requested_kinds,
            accept_invalid_certs: options.accept_invalid_certs,
            unsubscribe_grace: Duration::from_millis(
                options
                    .unsubscribe_grace_ms
                    .unwrap_or(DEFAULT_UNSUBSCRIBE_GRACE_MS),
            ),
        }
    }

    /// The event channel URL, `protocol://host:port/path`.
    pub fn channel_address(&self) -> String {
        format!("{}://{}:{}{}", self.protocol, self.host, self.port, self.path)
    }

    pub fn endpoint(&self) -> ChannelEndpoint {
        ChannelEndpoint {
            url: self.channel_address(),
            headers: self.headers.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }

    pub fn is_requested(&self, kind: &str) -> bool {
        self.requested_kinds.iter().any(|k| k == kind)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_options(&ClientOptions::default())
    }
}

/// Formats a header map with its values masked. Header values carry
/// credentials and must not reach the logs.
pub(crate) struct RedactedHeaders<'a>(pub(crate) &'a BTreeMap<String, String>);

impl fmt::Debug for RedactedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|name| (name, "***")))
            .finish()
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("marathon_host", &self.marathon_host)
            .field("marathon_port", &self.marathon_port)
            .field("marathon_protocol", &self.marathon_protocol)
            .field("marathon_path", &self.marathon_path)
            .field("headers", &RedactedHeaders(&self.headers))
            .field("event_types", &self.event_types)
            .field("enable_connection_event", &self.enable_connection_event)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("unsubscribe_grace_ms", &self.unsubscribe_grace_ms)
            .finish()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("path", &self.path)
            .field("headers", &RedactedHeaders(&self.headers))
            .field("requested_kinds", &self.requested_kinds)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("unsubscribe_grace", &self.unsubscribe_grace)
            .finish()
    }
}

fn non_empty_or(value: &Option<String>, default: &str) -> String {
    match value.as_deref() {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}
