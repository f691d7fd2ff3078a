use crate::error::ConnectorError;
use lazy_static::lazy_static;
use serde_json::Value;
use std::collections::HashSet;

/// The revision of the upstream Marathon event model the allowlist tracks.
pub const ALLOWLIST_VERSION: &str = "marathon-1.x";

/// Every event type Marathon publishes on `/v2/events`.
///
/// See `mesosphere/marathon` `core/event/Events.scala`. Requested event types
/// that are not listed here are dropped during configuration.
pub const ALLOWED_EVENT_TYPES: [&str; 28] = [
    "pod_created_event",
    "pod_updated_event",
    "pod_deleted_event",
    "scheduler_registered_event",
    "scheduler_reregistered_event",
    "scheduler_disconnected_event",
    "subscribe_event",
    "unsubscribe_event",
    "event_stream_attached",
    "event_stream_detached",
    "add_health_check_event",
    "remove_health_check_event",
    "failed_health_check_event",
    "health_status_changed_event",
    "unhealthy_task_kill_event",
    "group_change_success",
    "group_change_failed",
    "deployment_info",
    "deployment_success",
    "deployment_failed",
    "deployment_step_success",
    "deployment_step_failure",
    "app_terminated_event",
    "status_update_event",
    "instance_changed_event",
    "unknown_instance_terminated_event",
    "instance_health_changed_event",
    "framework_message_event",
];

/// Event types used when the caller requests none: deployment events only.
pub const DEFAULT_EVENT_TYPES: [&str; 3] =
    ["deployment_info", "deployment_success", "deployment_failed"];

/// Pseudo event type carrying the connection id the server assigned.
pub const CONNECTION_ID_EVENT: &str = "connectionId";

lazy_static! {
    static ref ALLOWLIST: HashSet<&'static str> = ALLOWED_EVENT_TYPES.iter().copied().collect();
}

/// Returns `true` if `event_type` exactly matches an allowlisted event type.
pub fn is_allowed(event_type: &str) -> bool {
    ALLOWLIST.contains(event_type)
}

/// A single frame as delivered by the event channel, payload still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// The event type label of the frame.
    pub event: String,
    /// The encoded payload (JSON for Marathon).
    pub data: String,
    /// The last event id seen on the stream, if the server sends ids.
    pub id: Option<String>,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }
}

/// A decoded Marathon event.
#[derive(Debug, Clone, PartialEq)]
pub struct MarathonEvent {
    pub kind: String,
    pub data: Value,
}

/// Decodes the payload of a raw frame.
pub fn decode_payload(raw: &RawEvent) -> Result<MarathonEvent, ConnectorError> {
    let data = serde_json::from_str(&raw.data).map_err(|source| ConnectorError::Decode {
        kind: raw.event.clone(),
        source,
    })?;
    Ok(MarathonEvent {
        kind: raw.event.clone(),
        data,
    })
}
