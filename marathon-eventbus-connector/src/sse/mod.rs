//! # Server-Sent Events channel
//!
//! The default [`ChannelConnector`]: reads Marathon's `/v2/events` stream
//! over HTTP(S) with `reqwest` and turns it into [`ChannelSignal`]s.
//!
//! Reconnection lives here. When the connection drops the channel reports an
//! error, waits for the retry delay (the server may change it with a `retry:`
//! field) and connects again, sending `Last-Event-ID` if the server used ids.
//! Gateway and availability errors (`500`, `502`, `503`, `504`) are retried
//! the same way. Any other status, or a response that is not
//! `text/event-stream`, ends the channel for good. A line longer than the
//! decoder's limit drops the connection.

mod decoder;

pub use decoder::SseDecoder;

use crate::{
    channel::{ChannelConnector, ChannelEndpoint, ChannelSignal, EventChannel},
    error::{ChannelError, ConnectorError},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE},
    StatusCode,
};
use std::{collections::VecDeque, time::Duration};

/// Reconnection delay used until the server sends a `retry:` field.
pub const DEFAULT_RETRY: Duration = Duration::from_secs(3);

const LAST_EVENT_ID: &str = "last-event-id";

type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

#[derive(Debug, Clone)]
pub struct SseConnector {
    retry: Duration,
}

impl SseConnector {
    pub fn new() -> Self {
        Self {
            retry: DEFAULT_RETRY,
        }
    }

    /// Overrides the initial reconnection delay.
    pub fn with_retry(retry: Duration) -> Self {
        Self { retry }
    }
}

impl Default for SseConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelConnector for SseConnector {
    fn connect(&self, endpoint: &ChannelEndpoint) -> Result<Box<dyn EventChannel>, ConnectorError> {
        let headers = build_headers(endpoint)?;
        if endpoint.accept_invalid_certs {
            tracing::warn!(url = %endpoint.url, "TLS certificate verification is disabled");
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(endpoint.accept_invalid_certs)
            .build()
            .map_err(ConnectorError::HttpClient)?;

        Ok(Box::new(SseChannel::new(
            client,
            endpoint.url.clone(),
            headers,
            self.retry,
        )))
    }
}

/// A rejection the server will keep giving: any non-200 status outside
/// `500`, `502`, `503` and `504`, or a body that is not an event stream.
/// Marathon answers `503` while a new leader is elected.
fn is_fatal(err: &ChannelError) -> bool {
    match err {
        ChannelError::Status(status) => !matches!(
            *status,
            StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        ),
        ChannelError::ContentType(_) => true,
        _ => false,
    }
}

fn build_headers(endpoint: &ChannelEndpoint) -> Result<HeaderMap, ConnectorError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    for (name, value) in &endpoint.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConnectorError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| ConnectorError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// An open (or reconnecting) event stream.
pub struct SseChannel {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    stream: Option<ByteStream>,
    decoder: SseDecoder,
    pending: VecDeque<ChannelSignal>,
    retry: Duration,
    reconnecting: bool,
    finished: bool,
}

impl SseChannel {
    fn new(client: reqwest::Client, url: String, headers: HeaderMap, retry: Duration) -> Self {
        Self {
            client,
            url,
            headers,
            stream: None,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            retry,
            reconnecting: false,
            finished: false,
        }
    }

    async fn open(&mut self) -> ChannelSignal {
        if self.reconnecting {
            let delay = self.decoder.retry().unwrap_or(self.retry);
            tracing::debug!(url = %self.url, ?delay, "Reconnecting to event stream");
            tokio::time::sleep(delay).await;
        }
        self.reconnecting = true;

        match self.request().await {
            Ok(stream) => {
                tracing::info!(url = %self.url, "Connected to event stream");
                self.stream = Some(stream);
                ChannelSignal::Open
            }
            Err(err) => {
                if is_fatal(&err) {
                    tracing::error!(url = %self.url, error = %err, "Event stream rejected, giving up");
                    self.finished = true;
                } else {
                    tracing::warn!(url = %self.url, error = %err, "Event stream unavailable, will retry");
                }
                ChannelSignal::Error(err)
            }
        }
    }

    async fn request(&mut self) -> Result<ByteStream, ChannelError> {
        let mut request = self.client.get(&self.url).headers(self.headers.clone());
        if let Some(id) = self.decoder.last_event_id() {
            request = request.header(LAST_EVENT_ID, id);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ChannelError::Status(status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("text/event-stream") {
            return Err(ChannelError::ContentType(content_type));
        }

        Ok(response.bytes_stream().boxed())
    }

    fn lose_stream(&mut self) {
        self.stream = None;
        self.decoder.reset();
    }
}

#[async_trait]
impl EventChannel for SseChannel {
    async fn next_signal(&mut self) -> Option<ChannelSignal> {
        loop {
            if let Some(signal) = self.pending.pop_front() {
                return Some(signal);
            }
            if self.finished {
                return None;
            }
            if self.stream.is_none() {
                return Some(self.open().await);
            }

            let next = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => continue,
            };
            match next {
                Some(Ok(chunk)) => match self.decoder.feed(&chunk) {
                    Ok(frames) => {
                        self.pending
                            .extend(frames.into_iter().map(ChannelSignal::Event));
                    }
                    Err(err) => {
                        tracing::warn!(url = %self.url, error = %err, "Dropping event stream");
                        self.lose_stream();
                        return Some(ChannelSignal::Error(err));
                    }
                },
                Some(Err(err)) => {
                    tracing::warn!(url = %self.url, error = %err, "Event stream failed");
                    self.lose_stream();
                    return Some(ChannelSignal::Error(ChannelError::Transport(err)));
                }
                None => {
                    tracing::warn!(url = %self.url, "Event stream ended");
                    self.lose_stream();
                    return Some(ChannelSignal::Error(ChannelError::Disconnected));
                }
            }
        }
    }

    async fn close(&mut self) {
        tracing::debug!(url = %self.url, "Closing event stream");
        self.finished = true;
        self.stream = None;
        self.pending.clear();
    }
}
