#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::get,
    Router,
};
use marathon_eventbus_connector::{
    channel::{ChannelConnector, ChannelEndpoint, ChannelSignal, EventChannel},
    BusListener, ConnectorError, Notification,
};
use serde_json::{json, Value};
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, mpsc},
    time::Instant,
};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

/// Payloads as Marathon sends them, trimmed to the interesting fields.
pub fn fixture_event(kind: &str) -> Option<Value> {
    let event = match kind {
        "deployment_info" => json!({
            "eventType": "deployment_info",
            "timestamp": "2014-03-01T23:29:30.158Z",
            "plan": {
                "id": "867ed450-f6a8-4d33-9b0e-e11c5513990b",
                "steps": [[{"action": "ScaleApplication", "app": "/my-app"}]],
                "version": "2014-03-01T23:24:14.846Z"
            },
            "currentStep": {"actions": [{"action": "ScaleApplication", "app": "/my-app"}]}
        }),
        "deployment_success" => json!({
            "eventType": "deployment_success",
            "timestamp": "2014-03-01T23:29:30.158Z",
            "id": "867ed450-f6a8-4d33-9b0e-e11c5513990b"
        }),
        "deployment_failed" => json!({
            "eventType": "deployment_failed",
            "timestamp": "2014-03-01T23:29:30.158Z",
            "id": "867ed450-f6a8-4d33-9b0e-e11c5513990b"
        }),
        "status_update_event" => json!({
            "eventType": "status_update_event",
            "timestamp": "2014-03-01T23:29:30.158Z",
            "slaveId": "20140909-054127-177048842-5050-1494-0",
            "taskId": "my-app_0-1396592784349",
            "taskStatus": "TASK_RUNNING",
            "appId": "/my-app",
            "host": "slave-1234.acme.org",
            "ports": [31372],
            "version": "2014-04-04T06:26:23.051Z"
        }),
        "group_change_success" => json!({
            "eventType": "group_change_success",
            "timestamp": "2014-03-01T23:29:30.158Z",
            "groupId": "/product-a/backend",
            "version": "2014-04-04T06:26:23.051Z"
        }),
        _ => return None,
    };
    Some(event)
}

/// Waits for the next notification, failing the test after five seconds.
pub async fn next(listener: &mut BusListener) -> Notification {
    tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("bus listener closed")
}

// --- Scripted in-memory channel ---

/// Hands out a single channel whose signals are pushed by the test.
pub struct ScriptedConnector {
    rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelSignal>>>,
    pub probe: ChannelProbe,
}

/// What the test can observe about the scripted channel.
#[derive(Clone, Default)]
pub struct ChannelProbe {
    pub connects: Arc<AtomicUsize>,
    pub endpoint: Arc<Mutex<Option<ChannelEndpoint>>>,
    pub closed_at: Arc<Mutex<Option<Instant>>>,
}

impl ChannelProbe {
    pub fn closed_at(&self) -> Option<Instant> {
        *self.closed_at.lock().unwrap()
    }
}

impl ScriptedConnector {
    pub fn new() -> (Self, mpsc::UnboundedSender<ChannelSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            rx: Mutex::new(Some(rx)),
            probe: ChannelProbe::default(),
        };
        (connector, tx)
    }
}

impl ChannelConnector for ScriptedConnector {
    fn connect(&self, endpoint: &ChannelEndpoint) -> Result<Box<dyn EventChannel>, ConnectorError> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        *self.probe.endpoint.lock().unwrap() = Some(endpoint.clone());
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("scripted connector used twice");
        Ok(Box::new(ScriptedChannel {
            rx,
            closed_at: self.probe.closed_at.clone(),
        }))
    }
}

struct ScriptedChannel {
    rx: mpsc::UnboundedReceiver<ChannelSignal>,
    closed_at: Arc<Mutex<Option<Instant>>>,
}

#[async_trait]
impl EventChannel for ScriptedChannel {
    async fn next_signal(&mut self) -> Option<ChannelSignal> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        *self.closed_at.lock().unwrap() = Some(Instant::now());
        self.rx.close();
    }
}

/// A connector whose connect always fails.
pub struct FailingConnector;

impl ChannelConnector for FailingConnector {
    fn connect(&self, endpoint: &ChannelEndpoint) -> Result<Box<dyn EventChannel>, ConnectorError> {
        Err(ConnectorError::InvalidHeader {
            name: "x".to_string(),
            reason: format!("refusing {}", endpoint.url),
        })
    }
}

// --- SSE fixture server ---

#[derive(Clone)]
struct FixtureState {
    events: broadcast::Sender<(String, String)>,
    connections: Arc<AtomicUsize>,
    authorizations: Arc<Mutex<Vec<Option<String>>>>,
    last_event_ids: Arc<Mutex<Vec<Option<String>>>>,
    rejections: Arc<AtomicUsize>,
}

/// A stand-in for Marathon's `/v2/events`. Every connection first receives a
/// `connectionId` event; further events are sent with [`request_event`].
///
/// `/v2/once` sends the `connectionId` and one `deployment_info` event with
/// id `7`, then ends the response. `/v2/unavailable-once` answers the first
/// request with `503` and streams like `/v2/events` afterwards. `/v2/plain`
/// answers with `text/plain`.
///
/// [`request_event`]: FixtureServer::request_event
pub struct FixtureServer {
    pub addr: SocketAddr,
    state: FixtureState,
}

impl FixtureServer {
    pub async fn start() -> Self {
        let (events, _) = broadcast::channel(64);
        let state = FixtureState {
            events,
            connections: Arc::new(AtomicUsize::new(0)),
            authorizations: Arc::new(Mutex::new(Vec::new())),
            last_event_ids: Arc::new(Mutex::new(Vec::new())),
            rejections: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new()
            .route("/v2/events", get(events_handler))
            .route("/v2/once", get(once_handler))
            .route("/v2/unavailable-once", get(unavailable_once_handler))
            .route("/v2/plain", get(|| async { "not an event stream" }))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Sends the fixture payload for `kind` to every open connection.
    pub fn request_event(&self, kind: &str) {
        let data = fixture_event(kind).expect("no fixture for event type");
        self.send_raw(kind, &data.to_string());
    }

    pub fn send_raw(&self, kind: &str, data: &str) {
        self.state
            .events
            .send((kind.to_string(), data.to_string()))
            .expect("no open connections");
    }

    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.state.authorizations.lock().unwrap().clone()
    }

    /// The `Last-Event-ID` header of every streaming request, in order.
    pub fn last_event_ids(&self) -> Vec<Option<String>> {
        self.state.last_event_ids.lock().unwrap().clone()
    }

    pub fn rejections(&self) -> usize {
        self.state.rejections.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

fn connection_greeting(state: &FixtureState, headers: &HeaderMap) -> Event {
    let n = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.authorizations.lock().unwrap().push(authorization);
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.last_event_ids.lock().unwrap().push(last_event_id);

    let connection_id = format!("conn-{n}");
    Event::default()
        .event("connectionId")
        .data(Value::String(connection_id).to_string())
}

async fn events_handler(
    State(state): State<FixtureState>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let greeting = connection_greeting(&state, &headers);

    let events = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok((kind, data)) => Some(Ok::<_, Infallible>(Event::default().event(kind).data(data))),
        Err(_) => None,
    });
    let stream = tokio_stream::once(Ok::<_, Infallible>(greeting)).chain(events);

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn once_handler(
    State(state): State<FixtureState>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let greeting = connection_greeting(&state, &headers);
    let deployment = Event::default()
        .event("deployment_info")
        .id("7")
        .data(json!({"id": "X"}).to_string());
    Sse::new(tokio_stream::iter(vec![Ok(greeting), Ok(deployment)]))
}

async fn unavailable_once_handler(
    State(state): State<FixtureState>,
    headers: HeaderMap,
) -> Response {
    if state.rejections.fetch_add(1, Ordering::SeqCst) == 0 {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    events_handler(State(state), headers).await.into_response()
}
