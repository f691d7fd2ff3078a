//! The named-event channel the client subscribes through.
//!
//! A channel owns the connection to the event feed, including reconnection.
//! The client only reads signals from it and closes it on unsubscribe.

use crate::{
    config::RedactedHeaders,
    error::{ChannelError, ConnectorError},
    events::RawEvent,
};
use async_trait::async_trait;
use std::{collections::BTreeMap, fmt};

/// Where and how to open a channel.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelEndpoint {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub accept_invalid_certs: bool,
}

impl fmt::Debug for ChannelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEndpoint")
            .field("url", &self.url)
            .field("headers", &RedactedHeaders(&self.headers))
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// A signal delivered by a channel.
#[derive(Debug)]
pub enum ChannelSignal {
    /// The connection is established (again, after a reconnect).
    Open,
    Event(RawEvent),
    Error(ChannelError),
}

#[async_trait]
pub trait EventChannel: Send {
    /// Waits for the next signal. `None` means the channel has given up and
    /// will not deliver anything else.
    async fn next_signal(&mut self) -> Option<ChannelSignal>;

    /// Tears down the connection.
    async fn close(&mut self);
}

/// Opens channels. The client holds one of these and calls it on subscribe.
pub trait ChannelConnector: Send + Sync {
    fn connect(&self, endpoint: &ChannelEndpoint) -> Result<Box<dyn EventChannel>, ConnectorError>;
}
