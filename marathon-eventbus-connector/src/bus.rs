//! # Notification Bus
//!
//! The public observe interface of the connector. Listeners register for a
//! named signal and are called synchronously, in registration order, every
//! time that signal is published.
//!
//! Signals are the accepted event types (payload: the decoded event), the
//! lifecycle signals [`SUBSCRIBED`], [`UNSUBSCRIBED`] and [`ERROR`], and the
//! `connectionId` pseudo event type when it is enabled.
//!
//! Registration and removal are safe from anywhere, including from inside a
//! listener while a publish is running: a publish works on a snapshot of the
//! listeners taken when it starts.

use crate::{error::ChannelError, events::MarathonEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use tokio::sync::mpsc;

pub const SUBSCRIBED: &str = "subscribed";
pub const UNSUBSCRIBED: &str = "unsubscribed";
pub const ERROR: &str = "error";

/// A payload published on the bus.
#[derive(Debug, Clone)]
pub enum Notification {
    /// An accepted event, including the `connectionId` pseudo event whose data
    /// is the id string issued by the server.
    Event(MarathonEvent),
    /// The channel reported that it is open.
    Subscribed { timestamp: DateTime<Utc> },
    Unsubscribed,
    /// The channel reported an error. Recovery is up to the channel.
    Error {
        timestamp: DateTime<Utc>,
        error: Arc<ChannelError>,
    },
}

impl Notification {
    /// The decoded event, if this is an event notification.
    pub fn event(&self) -> Option<&MarathonEvent> {
        match self {
            Notification::Event(event) => Some(event),
            _ => None,
        }
    }

    /// The connection id carried by a `connectionId` notification.
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            Notification::Event(event) if event.kind == crate::events::CONNECTION_ID_EVENT => {
                event.data.as_str()
            }
            _ => None,
        }
    }
}

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
pub struct NotificationBus {
    listeners: DashMap<String, Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("signals", &self.listeners.len())
            .finish()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `signal`.
    pub fn on<F>(&self, signal: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(signal.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered for `signal`.
    pub fn off(&self, signal: &str, id: ListenerId) -> bool {
        let removed = match self.listeners.get_mut(signal) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|(existing, _)| *existing != id);
                entries.len() != before
            }
            None => false,
        };
        self.listeners.remove_if(signal, |_, entries| entries.is_empty());
        removed
    }

    /// Calls every listener of `signal` with `notification`, in registration
    /// order. Returns the number of listeners called.
    pub fn publish(&self, signal: &str, notification: &Notification) -> usize {
        let snapshot: Vec<Listener> = match self.listeners.get(signal) {
            Some(entries) => entries.iter().map(|(_, l)| l.clone()).collect(),
            None => return 0,
        };
        for listener in &snapshot {
            listener(notification);
        }
        snapshot.len()
    }

    pub fn listener_count(&self, signal: &str) -> usize {
        self.listeners.get(signal).map_or(0, |entries| entries.len())
    }

    /// Creates a channel-backed listener for `signal`, for consumers that
    /// prefer to `await` notifications. Notifications that arrive while the
    /// buffer is full are dropped with a warning.
    pub fn listen(self: &Arc<Self>, signal: impl Into<String>, capacity: usize) -> BusListener {
        let signal = signal.into();
        let (tx, rx) = mpsc::channel(capacity);
        let signal_name = signal.clone();
        let id = self.on(signal.clone(), move |notification| {
            if let Err(err) = tx.try_send(notification.clone()) {
                tracing::warn!(
                    signal = %signal_name,
                    "Dropping notification for bus listener: {}",
                    err
                );
            }
        });
        BusListener {
            rx,
            unsubscribe_info: Some((signal, id, Arc::downgrade(self))),
        }
    }
}

/// A listener that buffers notifications of one signal in a channel.
///
/// It removes itself from the bus when dropped or when [`unsubscribe`] is
/// called.
///
/// [`unsubscribe`]: BusListener::unsubscribe
#[derive(Debug)]
pub struct BusListener {
    rx: mpsc::Receiver<Notification>,
    unsubscribe_info: Option<(String, ListenerId, Weak<NotificationBus>)>,
}

impl BusListener {
    /// Receives the next notification. Returns `None` once unsubscribed and
    /// drained.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Removes the listener from the bus. Buffered notifications can still be
    /// received.
    pub fn unsubscribe(&mut self) {
        if let Some((signal, id, bus)) = self.unsubscribe_info.take() {
            if let Some(bus) = bus.upgrade() {
                tracing::debug!(signal = %signal, "Removing bus listener");
                bus.off(&signal, id);
            }
        }
    }
}

impl Drop for BusListener {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
