//! # Handler Registry
//!
//! Builds the table that maps every requested event type to exactly one
//! handler. A caller supplied handler wins when its key matches a requested
//! type (ignoring case); every other requested type gets the default handler.
//!
//! Both kinds of entry publish the event on the [`NotificationBus`] first and
//! only then run their own logic, so bus listeners never depend on what a
//! custom handler does.

use crate::{
    bus::{Notification, NotificationBus},
    config::Settings,
    events::MarathonEvent,
};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// Caller logic run for an event type, with the event type and decoded payload.
pub trait EventHandler: Send + Sync {
    fn handle(&self, kind: &str, data: &Value);
}

impl<F> EventHandler for F
where
    F: Fn(&str, &Value) + Send + Sync,
{
    fn handle(&self, kind: &str, data: &Value) {
        self(kind, data)
    }
}

/// Receives the notice the default handler emits for each event it sees.
pub trait NoticeSink: Send + Sync {
    fn notice(&self, kind: &str);
}

/// The default [`NoticeSink`], writing to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNoticeSink;

impl NoticeSink for TracingNoticeSink {
    fn notice(&self, kind: &str) {
        tracing::info!(kind = %kind, "Default handler for {}. Do nothing.", kind);
    }
}

enum HandlerAction {
    Custom(Arc<dyn EventHandler>),
    Default,
}

/// The per event type dispatch table. Built once and read-only afterwards.
pub struct HandlerTable {
    entries: HashMap<String, HandlerAction>,
    bus: Arc<NotificationBus>,
    sink: Arc<dyn NoticeSink>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.entries.keys().collect();
        kinds.sort();
        f.debug_struct("HandlerTable").field("kinds", &kinds).finish()
    }
}

impl HandlerTable {
    /// Builds the table for `settings.requested_kinds`.
    ///
    /// `custom` is applied in order, so a later key that matches the same
    /// event type replaces an earlier one. Entries whose key matches no
    /// requested event type are ignored.
    pub fn build(
        settings: &Settings,
        custom: &[(String, Arc<dyn EventHandler>)],
        bus: Arc<NotificationBus>,
        sink: Arc<dyn NoticeSink>,
    ) -> Self {
        let canonical: HashMap<String, &String> = settings
            .requested_kinds
            .iter()
            .map(|kind| (kind.to_lowercase(), kind))
            .collect();

        let mut entries = HashMap::with_capacity(settings.requested_kinds.len());
        for (key, handler) in custom {
            match canonical.get(&key.to_lowercase()) {
                Some(kind) => {
                    tracing::debug!(kind = %kind, key = %key, "Installing custom handler");
                    entries.insert((*kind).clone(), HandlerAction::Custom(handler.clone()));
                }
                None => {
                    tracing::debug!(key = %key, "Ignoring handler for an event type that is not requested");
                }
            }
        }

        for kind in &settings.requested_kinds {
            entries
                .entry(kind.clone())
                .or_insert(HandlerAction::Default);
        }

        Self { entries, bus, sink }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// `Some(true)` if `kind` is handled by a custom handler, `Some(false)`
    /// for the default handler, `None` if `kind` is not in the table.
    pub fn is_custom(&self, kind: &str) -> Option<bool> {
        self.entries
            .get(kind)
            .map(|action| matches!(action, HandlerAction::Custom(_)))
    }

    /// Runs the entry for `event.kind`. Returns `false` if the table has no
    /// entry for it, in which case nothing is published.
    pub fn invoke(&self, event: &MarathonEvent) -> bool {
        let Some(action) = self.entries.get(&event.kind) else {
            return false;
        };

        self.bus
            .publish(&event.kind, &Notification::Event(event.clone()));

        match action {
            HandlerAction::Custom(handler) => handler.handle(&event.kind, &event.data),
            HandlerAction::Default => self.sink.notice(&event.kind),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientOptions;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<String>>);

    impl NoticeSink for RecordingSink {
        fn notice(&self, kind: &str) {
            self.0.lock().unwrap().push(kind.to_string());
        }
    }

    fn settings(types: &[&str], connection_event: bool) -> Settings {
        Settings::from_options(&ClientOptions {
            event_types: types.iter().map(|t| t.to_string()).collect(),
            enable_connection_event: connection_event,
            ..Default::default()
        })
    }

    fn event(kind: &str) -> MarathonEvent {
        MarathonEvent {
            kind: kind.to_string(),
            data: json!({"id": "X"}),
        }
    }

    fn handler(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Arc<dyn EventHandler> {
        let log = log.clone();
        Arc::new(move |kind: &str, _: &Value| {
            log.lock().unwrap().push(format!("{tag}:{kind}"));
        })
    }

    #[test]
    fn every_requested_kind_has_one_entry() {
        let settings = settings(&[], true);
        let table = HandlerTable::build(
            &settings,
            &[],
            Arc::new(NotificationBus::new()),
            Arc::new(TracingNoticeSink),
        );
        assert_eq!(table.len(), settings.requested_kinds.len());
        for kind in &settings.requested_kinds {
            assert_eq!(table.is_custom(kind), Some(false));
        }
    }

    #[test]
    fn custom_handler_key_matches_ignoring_case() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let table = HandlerTable::build(
            &settings(&["deployment_info"], false),
            &[("Deployment_Info".to_string(), handler(&log, "custom"))],
            Arc::new(NotificationBus::new()),
            Arc::new(TracingNoticeSink),
        );
        assert_eq!(table.is_custom("deployment_info"), Some(true));
        assert!(table.invoke(&event("deployment_info")));
        assert_eq!(*log.lock().unwrap(), vec!["custom:deployment_info"]);
    }

    #[test]
    fn handler_for_unrequested_kind_falls_back_to_default() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink::default());
        let table = HandlerTable::build(
            &settings(&["deployment_info"], false),
            &[("status_update_event".to_string(), handler(&log, "custom"))],
            Arc::new(NotificationBus::new()),
            sink.clone(),
        );
        assert!(!table.contains("status_update_event"));
        assert_eq!(table.is_custom("deployment_info"), Some(false));

        table.invoke(&event("deployment_info"));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(*sink.0.lock().unwrap(), vec!["deployment_info"]);
    }

    #[test]
    fn later_handler_for_same_kind_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let table = HandlerTable::build(
            &settings(&["deployment_failed"], false),
            &[
                ("deployment_failed".to_string(), handler(&log, "first")),
                ("DEPLOYMENT_FAILED".to_string(), handler(&log, "second")),
            ],
            Arc::new(NotificationBus::new()),
            Arc::new(TracingNoticeSink),
        );
        table.invoke(&event("deployment_failed"));
        assert_eq!(*log.lock().unwrap(), vec!["second:deployment_failed"]);
    }

    #[test]
    fn connection_id_handler_is_installed_when_enabled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let table = HandlerTable::build(
            &settings(&[], true),
            &[("connectionId".to_string(), handler(&log, "custom"))],
            Arc::new(NotificationBus::new()),
            Arc::new(TracingNoticeSink),
        );
        assert_eq!(table.is_custom("connectionId"), Some(true));
    }

    #[test]
    fn publish_happens_before_custom_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = Arc::new(NotificationBus::new());
        let bus_log = log.clone();
        bus.on("deployment_info", move |_| {
            bus_log.lock().unwrap().push("bus".to_string());
        });

        let table = HandlerTable::build(
            &settings(&["deployment_info"], false),
            &[("deployment_info".to_string(), handler(&log, "custom"))],
            bus,
            Arc::new(TracingNoticeSink),
        );
        table.invoke(&event("deployment_info"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["bus".to_string(), "custom:deployment_info".to_string()]
        );
    }

    #[test]
    fn default_handler_publishes_exactly_once() {
        let bus = Arc::new(NotificationBus::new());
        let mut listener = bus.listen("deployment_success", 8);
        let table = HandlerTable::build(
            &settings(&[], false),
            &[],
            bus.clone(),
            Arc::new(TracingNoticeSink),
        );

        assert!(table.invoke(&event("deployment_success")));
        let received = listener.try_recv().unwrap();
        assert_eq!(received.event().unwrap().data, json!({"id": "X"}));
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn unknown_kind_is_not_dispatched() {
        let bus = Arc::new(NotificationBus::new());
        let mut listener = bus.listen("status_update_event", 8);
        let table = HandlerTable::build(
            &settings(&[], false),
            &[],
            bus.clone(),
            Arc::new(TracingNoticeSink),
        );
        assert!(!table.invoke(&event("status_update_event")));
        assert!(listener.try_recv().is_none());
    }
}
