//! Server-sent events over a streaming POST.
//!
//! Browsers only speak SSE over GET, so the completions endpoint is driven
//! with a plain streaming request and the body is split into frames here.
//! Frames look like:
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: [DONE]
//! ```
//! This layer only extracts the `data: ` payloads. Interpreting them,
//! including the `[DONE]` sentinel, is left to the consumer.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::SseError;

const FRAME_DELIMITER: &str = "\n\n";
const DATA_PREFIX: &str = "data: ";
const TRANSPORT_HINT: &str = "/sse";

/// One dispatched event.
#[derive(Debug)]
pub enum SseEvent {
    /// The payload of a `data: ` frame, prefix stripped.
    Message(String),
    /// The stream failed. Sent at most once, always last.
    Error(SseError),
}

/// Incremental frame parser.
///
/// Bytes are decoded with a carry-over for incomplete UTF-8 sequences, and
/// text after the last delimiter is held until more arrives, so chunk
/// boundaries may fall anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk, returning the payloads of every frame it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);

        let mut payloads = Vec::new();
        while let Some(idx) = self.buffer.find(FRAME_DELIMITER) {
            let frame: String = self.buffer.drain(..idx + FRAME_DELIMITER.len()).collect();
            let frame = &frame[..idx];

            match frame.strip_prefix(DATA_PREFIX) {
                Some(data) => payloads.push(data.to_string()),
                None => trace!(frame, "skipping non-data frame"),
            }
        }
        payloads
    }

    /// Bytes and text received but not yet part of a complete frame.
    pub fn leftover(&self) -> usize {
        self.pending.len() + self.buffer.len()
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = start + e.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending[start..valid]));

                    match e.error_len() {
                        // Invalid sequence: replace it and keep going
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            start = valid + len;
                        }
                        // Truncated sequence: wait for the next chunk
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
    }
}

/// Remove the `/sse` marker callers put in the URL. It tells the caller the
/// endpoint streams, the server itself doesn't route on it.
pub fn strip_transport_hint(url: &str) -> String {
    url.replacen(TRANSPORT_HINT, "", 1)
}

/// A POST whose response body is read as an event stream.
#[derive(Debug, Clone)]
pub struct SseRequest {
    url: String,
    body: Vec<u8>,
    csrf_token: Option<String>,
}

impl SseRequest {
    pub fn post_json<T: Serialize>(url: &str, payload: &T) -> Result<Self, SseError> {
        Ok(Self {
            url: strip_transport_hint(url),
            body: serde_json::to_vec(payload)?,
            csrf_token: None,
        })
    }

    pub fn csrf_token(mut self, token: Option<String>) -> Self {
        self.csrf_token = token;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn build(self, client: &Client) -> RequestBuilder {
        let mut request = client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(self.body);

        if let Some(token) = &self.csrf_token {
            request = request.header("X-CSRF-TOKEN", token);
        }

        request
    }
}

/// Consumer side of one streaming request.
///
/// Dropping the handle cancels the request, as does [`EventSource::close`].
pub struct EventSource {
    rx: mpsc::UnboundedReceiver<SseEvent>,
    cancel: CancellationToken,
    closed: bool,
}

impl EventSource {
    /// Start the request on a background task. Must be called inside a tokio runtime.
    pub fn connect(client: &Client, request: SseRequest) -> Self {
        Self::connect_with_cancel(client, request, CancellationToken::new())
    }

    /// Like [`EventSource::connect`], aborting when `cancel` fires.
    pub fn connect_with_cancel(
        client: &Client,
        request: SseRequest,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(url = %request.url, "opening event stream");

        let builder = request.build(client);
        tokio::spawn(pump(builder, tx, cancel.clone()));

        Self {
            rx,
            cancel,
            closed: false,
        }
    }

    /// Next event, or `None` once the stream has ended or the handle is closed.
    pub async fn next(&mut self) -> Option<SseEvent> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop the read loop. Nothing is delivered after this returns; calling it
    /// again does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.rx.close();
        debug!("event stream closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Send `event` unless the consumer has gone away. Returns whether to keep reading.
fn dispatch(
    tx: &mpsc::UnboundedSender<SseEvent>,
    cancel: &CancellationToken,
    event: SseEvent,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tx.send(event).is_ok()
}

async fn pump(
    request: RequestBuilder,
    tx: mpsc::UnboundedSender<SseEvent>,
    cancel: CancellationToken,
) {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("request cancelled before response");
            return;
        }
        response = request.send() => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "event stream request failed");
            dispatch(&tx, &cancel, SseEvent::Error(SseError::Connect(e)));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!(%status, "event stream rejected");
        dispatch(&tx, &cancel, SseEvent::Error(SseError::Status(status)));
        return;
    }
    if status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT {
        dispatch(&tx, &cancel, SseEvent::Error(SseError::NoBody));
        return;
    }

    read_frames(response.bytes_stream(), &tx, &cancel).await;
}

async fn read_frames(
    body: impl Stream<Item = reqwest::Result<Bytes>>,
    tx: &mpsc::UnboundedSender<SseEvent>,
    cancel: &CancellationToken,
) {
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();
    let mut frames = 0usize;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(frames, "event stream cancelled");
                return;
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for data in decoder.feed(&bytes) {
                    frames += 1;
                    if !dispatch(tx, cancel, SseEvent::Message(data)) {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, frames, "event stream interrupted");
                dispatch(tx, cancel, SseEvent::Error(SseError::Transport(e)));
                return;
            }
            None => {
                debug!(frames, leftover = decoder.leftover(), "event stream ended");
                return;
            }
        }
    }
}
