//! Connection state and the background worker that drains an event channel.

use crate::{
    bus::{Notification, NotificationBus, ERROR, SUBSCRIBED},
    channel::{ChannelSignal, EventChannel},
    events::{decode_payload, RawEvent},
    registry::HandlerTable,
};
use chrono::Utc;
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::oneshot;

/// The lifecycle of an `EventBusClient`.
///
/// `Idle -> Connecting -> Subscribed -> Unsubscribing -> Closed`. Channel
/// errors do not move the state; the channel handles its own recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Subscribed,
    Unsubscribing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Unsubscribing => "unsubscribing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Shared, lock-protected connection state.
#[derive(Debug, Clone)]
pub(crate) struct SharedState(Arc<Mutex<ConnectionState>>);

impl SharedState {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(ConnectionState::Idle)))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        // The state is a plain Copy value, a poisoned lock still holds a valid one.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.lock()
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        *self.lock() = state;
    }
}

/// Reads signals from one channel and dispatches them until told to stop or
/// until the channel gives up. Signals are handled one at a time, in the
/// order the channel delivers them.
pub(crate) struct ChannelWorker {
    channel: Box<dyn EventChannel>,
    table: Arc<HandlerTable>,
    bus: Arc<NotificationBus>,
    state: SharedState,
}

impl ChannelWorker {
    pub(crate) fn new(
        channel: Box<dyn EventChannel>,
        table: Arc<HandlerTable>,
        bus: Arc<NotificationBus>,
        state: SharedState,
    ) -> Self {
        Self {
            channel,
            table,
            bus,
            state,
        }
    }

    pub(crate) async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        tracing::debug!("Channel worker started.");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::debug!("Channel worker: shutdown signal received.");
                    break;
                }
                signal = self.channel.next_signal() => match signal {
                    Some(ChannelSignal::Open) => self.handle_open(),
                    Some(ChannelSignal::Event(raw)) => self.handle_event(raw),
                    Some(ChannelSignal::Error(err)) => {
                        tracing::warn!(error = %err, "Event channel reported an error");
                        self.bus.publish(
                            ERROR,
                            &Notification::Error {
                                timestamp: Utc::now(),
                                error: Arc::new(err),
                            },
                        );
                    }
                    None => {
                        tracing::warn!("Event channel finished, no more events will arrive.");
                        break;
                    }
                }
            }
        }
        self.channel.close().await;
        tracing::debug!("Channel worker stopped.");
    }

    fn handle_open(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Connecting | ConnectionState::Subscribed => {
                    *state = ConnectionState::Subscribed;
                }
                other => {
                    tracing::debug!(state = %other, "Ignoring channel open");
                    return;
                }
            }
        }
        tracing::info!("Subscribed to the Marathon event bus.");
        self.bus.publish(
            SUBSCRIBED,
            &Notification::Subscribed {
                timestamp: Utc::now(),
            },
        );
    }

    fn handle_event(&self, raw: RawEvent) {
        if !self.table.contains(&raw.event) {
            tracing::trace!(kind = %raw.event, "Skipping event type without a handler");
            return;
        }

        let event = match decode_payload(&raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(kind = %raw.event, error = %err, "Dropping event with malformed payload");
                return;
            }
        };

        if catch_unwind(AssertUnwindSafe(|| self.table.invoke(&event))).is_err() {
            tracing::error!(kind = %event.kind, "Event handler panicked; continuing with the next event");
        }
    }
}
