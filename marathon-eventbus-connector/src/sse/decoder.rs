use crate::{error::ChannelError, events::RawEvent};
use std::time::Duration;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Upper bound for an unterminated line and for the data of one frame.
pub const DEFAULT_MAX_LINE: usize = 1024 * 1024;

/// Incremental `text/event-stream` decoder.
///
/// Bytes are fed as they arrive; complete frames come out. Lines may be split
/// across chunks at any byte, including between `\r` and `\n`.
#[derive(Debug)]
pub struct SseDecoder {
    max_line: usize,
    buf: Vec<u8>,
    started: bool,
    event: String,
    data: String,
    has_data: bool,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            max_line,
            buf: Vec::new(),
            started: false,
            event: String::new(),
            data: String::new(),
            has_data: false,
            last_event_id: None,
            retry: None,
        }
    }

    /// Feeds a chunk and returns every frame it completes.
    ///
    /// Fails once a pending line or the data of the current frame grows past
    /// the limit. The stream should be dropped and the decoder [`reset`].
    ///
    /// [`reset`]: SseDecoder::reset
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<RawEvent>, ChannelError> {
        self.buf.extend_from_slice(chunk);
        if !self.started {
            if self.buf.len() < BOM.len() && BOM.starts_with(&self.buf) {
                return Ok(Vec::new());
            }
            if self.buf.starts_with(BOM) {
                self.buf.drain(..BOM.len());
            }
            self.started = true;
        }

        let mut frames = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < self.buf.len() {
            let terminator = match self.buf[i] {
                b'\n' => 1,
                b'\r' => {
                    // Wait for the next chunk to tell CR from CRLF.
                    if i + 1 == self.buf.len() {
                        break;
                    }
                    if self.buf[i + 1] == b'\n' {
                        2
                    } else {
                        1
                    }
                }
                _ => {
                    i += 1;
                    continue;
                }
            };
            let line = String::from_utf8_lossy(&self.buf[start..i]).into_owned();
            self.process_line(&line, &mut frames);
            i += terminator;
            start = i;
        }
        self.buf.drain(..start);

        if self.buf.len() > self.max_line || self.data.len() > self.max_line {
            return Err(ChannelError::LineTooLong {
                limit: self.max_line,
            });
        }
        Ok(frames)
    }

    /// The most recent `id` field, sent back as `Last-Event-ID` on reconnect.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// The reconnection delay requested by the server, if any.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    /// Discards any partial frame. Called when the underlying stream is lost.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.started = false;
        self.event.clear();
        self.data.clear();
        self.has_data = false;
    }

    fn process_line(&mut self, line: &str, frames: &mut Vec<RawEvent>) {
        if line.is_empty() {
            self.dispatch(frames);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = value.to_string(),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, frames: &mut Vec<RawEvent>) {
        let event = std::mem::take(&mut self.event);
        if !self.has_data {
            return;
        }
        self.has_data = false;
        frames.push(RawEvent {
            event: if event.is_empty() {
                "message".to_string()
            } else {
                event
            },
            data: std::mem::take(&mut self.data),
            id: self.last_event_id.clone(),
        });
    }
}
