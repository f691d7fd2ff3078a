//! A client for the Marathon event bus (`/v2/events`).
//!
//! The crate subscribes to the orchestrator's Server-Sent Events stream,
//! restricts it to an allowlist of known event types, and republishes every
//! accepted event on a [`bus::NotificationBus`] together with lifecycle
//! signals (`subscribed`, `unsubscribed`, `error`).
//!
//! # Key Components
//!
//! *   [`client::EventBusClient`]: The main entry point. Built from
//!     [`config::ClientOptions`], it owns the subscription lifecycle.
//! *   [`registry`]: The per event type handler table, with caller supplied
//!     handlers taking precedence over the default one.
//! *   [`bus`]: The listener registry notifications are published on.
//! *   [`channel`] and [`sse`]: The event channel abstraction and its
//!     Server-Sent Events implementation.
pub mod bus;
pub mod channel;
pub mod client;
/// Raw options and the effective settings derived from them.
pub mod config;
pub mod error;
/// The event type allowlist and event payloads.
pub mod events;
mod lifecycle;
pub mod registry;
pub mod sse;

pub use bus::{BusListener, ListenerId, Notification, NotificationBus};
pub use client::{EventBusClient, EventBusClientBuilder};
pub use config::{ClientOptions, Settings};
pub use error::{ChannelError, ConnectorError};
pub use events::{MarathonEvent, RawEvent};
pub use lifecycle::ConnectionState;
