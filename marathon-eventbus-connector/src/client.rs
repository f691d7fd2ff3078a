//! # Event Bus Client
//!
//! [`EventBusClient`] ties the pieces together: it validates the options,
//! builds the handler table once, opens the event channel on [`subscribe`]
//! and closes it again on [`unsubscribe`].
//!
//! ```no_run
//! use marathon_eventbus_connector::{bus, ClientOptions, EventBusClient};
//!
//! # async fn demo() -> Result<(), marathon_eventbus_connector::ConnectorError> {
//! let client = EventBusClient::builder(ClientOptions {
//!     marathon_host: Some("localhost".into()),
//!     event_types: vec!["deployment_info".into(), "deployment_failed".into()],
//!     ..Default::default()
//! })
//! .handler("deployment_failed", |kind: &str, data: &serde_json::Value| {
//!     eprintln!("{kind}: {data}");
//! })
//! .build();
//!
//! client.on(bus::SUBSCRIBED, |_| println!("subscribed"));
//! client.subscribe()?;
//! // ...
//! client.unsubscribe().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`subscribe`]: EventBusClient::subscribe
//! [`unsubscribe`]: EventBusClient::unsubscribe

use crate::{
    bus::{ListenerId, Notification, NotificationBus, UNSUBSCRIBED},
    channel::ChannelConnector,
    config::{ClientOptions, Settings},
    error::ConnectorError,
    lifecycle::{ChannelWorker, ConnectionState, SharedState},
    registry::{EventHandler, HandlerTable, NoticeSink, TracingNoticeSink},
    sse::SseConnector,
};
use std::sync::{Arc, Mutex};
use tokio::{sync::oneshot, task::JoinHandle};

struct WorkerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A client for Marathon's event bus.
///
/// One instance covers one subscription: `subscribe` is accepted once, and
/// after `unsubscribe` the client stays closed.
pub struct EventBusClient {
    settings: Arc<Settings>,
    table: Arc<HandlerTable>,
    bus: Arc<NotificationBus>,
    connector: Arc<dyn ChannelConnector>,
    state: SharedState,
    worker: Mutex<Option<WorkerHandle>>,
}

impl std::fmt::Debug for EventBusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBusClient")
            .field("settings", &self.settings)
            .field("table", &self.table)
            .field("state", &self.state.get())
            .finish()
    }
}

impl EventBusClient {
    /// Creates a client with default handlers and the SSE transport.
    pub fn new(options: ClientOptions) -> Self {
        Self::builder(options).build()
    }

    pub fn builder(options: ClientOptions) -> EventBusClientBuilder {
        EventBusClientBuilder {
            options,
            handlers: Vec::new(),
            bus: None,
            sink: Arc::new(TracingNoticeSink),
            connector: Arc::new(SseConnector::new()),
        }
    }

    /// The effective configuration.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.table
    }

    /// The bus every notification is published on.
    pub fn bus(&self) -> Arc<NotificationBus> {
        self.bus.clone()
    }

    /// Shorthand for `self.bus().on(signal, listener)`.
    pub fn on<F>(&self, signal: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.bus.on(signal, listener)
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Opens the event channel and starts dispatching events.
    ///
    /// Only valid while idle. Must be called from within a Tokio runtime. The
    /// client moves to `Connecting` and then to `Subscribed` once the channel
    /// reports that it is open, publishing `subscribed`.
    pub fn subscribe(&self) -> Result<(), ConnectorError> {
        let mut state = self.state.lock();
        if *state != ConnectionState::Idle {
            return Err(ConnectorError::InvalidState {
                operation: "subscribe",
                state: *state,
            });
        }

        let endpoint = self.settings.endpoint();
        let channel = self.connector.connect(&endpoint)?;
        *state = ConnectionState::Connecting;
        drop(state);

        tracing::info!(
            url = %endpoint.url,
            event_types = ?self.settings.requested_kinds,
            "Subscribing to the Marathon event bus"
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = ChannelWorker::new(
            channel,
            self.table.clone(),
            self.bus.clone(),
            self.state.clone(),
        );
        let task = tokio::spawn(worker.run(shutdown_rx));

        *self.lock_worker() = Some(WorkerHandle {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Publishes `unsubscribed`, waits for the grace delay so events already
    /// being dispatched can finish, then closes the channel.
    ///
    /// Valid from `Connecting` or `Subscribed`. The state moves to
    /// `Unsubscribing` in the same step that validates it, before
    /// `unsubscribed` goes out, so listeners of that signal already see
    /// `Unsubscribing` and a concurrent second call is rejected. Resolves
    /// once the client is `Closed`.
    pub async fn unsubscribe(&self) -> Result<(), ConnectorError> {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Connecting | ConnectionState::Subscribed => {
                    *state = ConnectionState::Unsubscribing;
                }
                other => {
                    return Err(ConnectorError::InvalidState {
                        operation: "unsubscribe",
                        state: other,
                    });
                }
            }
        }

        tracing::info!("Unsubscribing from the Marathon event bus.");
        self.bus.publish(UNSUBSCRIBED, &Notification::Unsubscribed);

        tokio::time::sleep(self.settings.unsubscribe_grace).await;

        let worker = self.lock_worker().take();
        if let Some(WorkerHandle { shutdown, task }) = worker {
            // The worker may already have stopped on its own.
            let _ = shutdown.send(());
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Channel worker terminated abnormally");
            }
        }

        self.state.set(ConnectionState::Closed);
        tracing::info!("Event channel closed.");
        Ok(())
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<WorkerHandle>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for EventBusClient {
    fn drop(&mut self) {
        if let Some(worker) = self.lock_worker().take() {
            tracing::debug!("Client dropped while subscribed, aborting channel worker");
            worker.task.abort();
        }
    }
}

/// Builds an [`EventBusClient`]. Obtained from [`EventBusClient::builder`].
pub struct EventBusClientBuilder {
    options: ClientOptions,
    handlers: Vec<(String, Arc<dyn EventHandler>)>,
    bus: Option<Arc<NotificationBus>>,
    sink: Arc<dyn NoticeSink>,
    connector: Arc<dyn ChannelConnector>,
}

impl EventBusClientBuilder {
    /// Registers caller logic for an event type. The key is matched against
    /// the requested event types ignoring case; keys that match none are
    /// ignored and the event type keeps its default handler.
    pub fn handler<H>(mut self, event_type: impl Into<String>, handler: H) -> Self
    where
        H: EventHandler + 'static,
    {
        self.handlers.push((event_type.into(), Arc::new(handler)));
        self
    }

    /// Publishes on an existing bus instead of a fresh one.
    pub fn bus(mut self, bus: Arc<NotificationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Replaces where the default handler's notice goes.
    pub fn notice_sink<S>(mut self, sink: S) -> Self
    where
        S: NoticeSink + 'static,
    {
        self.sink = Arc::new(sink);
        self
    }

    /// Replaces the SSE transport.
    pub fn connector<C>(mut self, connector: C) -> Self
    where
        C: ChannelConnector + 'static,
    {
        self.connector = Arc::new(connector);
        self
    }

    pub fn build(self) -> EventBusClient {
        let settings = Settings::from_options(&self.options);
        let bus = self.bus.unwrap_or_default();
        let table = HandlerTable::build(&settings, &self.handlers, bus.clone(), self.sink);
        tracing::debug!(?table, "Built handler table");

        EventBusClient {
            settings: Arc::new(settings),
            table: Arc::new(table),
            bus,
            connector: self.connector,
            state: SharedState::new(),
            worker: Mutex::new(None),
        }
    }
}
