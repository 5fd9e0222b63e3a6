//! Response relaying and per-request completion tracking.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Bytes;
use futures::Stream;
use serde_json::Value;

use crate::logging::LogEntry;
use crate::sink::EventSink;

/// Upper bound on response bytes kept for token extraction.
pub const CAPTURE_LIMIT: usize = 1024 * 1024;

const DISCONNECTED: &str = "client disconnected";

/// Guarantees one [`LogEntry`] per scanned request.
///
/// The entry is submitted when the request completes through [`finish`] or
/// [`fail`]. If the guard is dropped first (the caller went away while the
/// upstream was still in flight), it is submitted with a disconnect marker.
///
/// [`finish`]: PendingEvent::finish
/// [`fail`]: PendingEvent::fail
pub struct PendingEvent {
    sink: EventSink,
    entry: Option<LogEntry>,
    started: Instant,
}

impl PendingEvent {
    pub fn new(sink: EventSink, entry: LogEntry, started: Instant) -> Self {
        Self {
            sink,
            entry: Some(entry),
            started,
        }
    }

    /// Record the status returned to the caller.
    pub fn set_status(&mut self, status: u16) {
        if let Some(entry) = self.entry.as_mut() {
            entry.status = Some(status);
        }
    }

    /// Complete normally.
    pub fn finish(mut self, tokens: i64) {
        if let Some(mut entry) = self.entry.take() {
            entry.tokens = tokens;
            self.emit(entry);
        }
    }

    /// Complete with an error marker and no token count.
    pub fn fail(mut self, status: Option<u16>, error: &str) {
        if let Some(mut entry) = self.entry.take() {
            if status.is_some() {
                entry.status = status;
            }
            entry.tokens = 0;
            append_error(&mut entry, error);
            self.emit(entry);
        }
    }

    fn emit(&self, mut entry: LogEntry) {
        entry.duration_ms = self.started.elapsed().as_millis() as i64;
        self.sink.submit(entry);
    }
}

impl Drop for PendingEvent {
    fn drop(&mut self) {
        if let Some(mut entry) = self.entry.take() {
            append_error(&mut entry, DISCONNECTED);
            self.emit(entry);
        }
    }
}

fn append_error(entry: &mut LogEntry, error: &str) {
    entry.error = Some(match entry.error.take() {
        Some(existing) => format!("{}; {}", existing, error),
        None => error.to_string(),
    });
}

type UpstreamBody = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Streams the upstream body to the caller unchanged.
///
/// Up to [`CAPTURE_LIMIT`] bytes are copied aside when `capture` is set, and
/// the token count is read from them once the upstream body ends.
///
/// When the body length is known, the request completes as soon as the last
/// byte is handed out: the server stops polling a body once `Content-Length`
/// bytes are written, so the end of the stream may never be observed.
pub struct RelayStream {
    inner: UpstreamBody,
    pending: Option<PendingEvent>,
    captured: Option<Vec<u8>>,
    expected: Option<u64>,
    relayed: u64,
}

impl RelayStream {
    pub fn new<S>(inner: S, pending: PendingEvent, capture: bool) -> Self
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Box::pin(inner),
            pending: Some(pending),
            captured: capture.then(Vec::new),
            expected: None,
            relayed: 0,
        }
    }

    /// Declare the body length advertised by the upstream.
    pub fn with_content_length(mut self, length: Option<u64>) -> Self {
        self.expected = length;
        self
    }

    fn complete(&mut self) {
        if let Some(pending) = self.pending.take() {
            let tokens = self.captured.as_deref().map(extract_tokens).unwrap_or(0);
            pending.finish(tokens);
        }
    }
}

impl Stream for RelayStream {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(buf) = this.captured.as_mut() {
                    if buf.len() + chunk.len() <= CAPTURE_LIMIT {
                        buf.extend_from_slice(&chunk);
                    } else {
                        this.captured = None;
                    }
                }
                this.relayed += chunk.len() as u64;
                if this.expected.is_some_and(|n| this.relayed >= n) {
                    this.complete();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                if let Some(pending) = this.pending.take() {
                    pending.fail(None, &format!("upstream stream error: {}", e));
                }
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Read the token count from an LLM response body.
///
/// Handles plain JSON bodies and server-sent event streams. OpenAI-style
/// `usage.total_tokens` wins; otherwise Anthropic-style `input_tokens` and
/// `output_tokens` are summed. Returns 0 when nothing is found.
pub fn extract_tokens(body: &[u8]) -> i64 {
    let Ok(text) = std::str::from_utf8(body) else {
        return 0;
    };
    match serde_json::from_str::<Value>(text) {
        Ok(value) => value.get("usage").and_then(usage_tokens).unwrap_or(0),
        Err(_) => sse_tokens(text),
    }
}

fn usage_tokens(usage: &Value) -> Option<i64> {
    if let Some(total) = usage.get("total_tokens").and_then(Value::as_i64) {
        return Some(total);
    }
    let input = usage.get("input_tokens").and_then(Value::as_i64);
    let output = usage.get("output_tokens").and_then(Value::as_i64);
    match (input, output) {
        (None, None) => None,
        (i, o) => Some(i.unwrap_or(0) + o.unwrap_or(0)),
    }
}

fn sse_tokens(text: &str) -> i64 {
    let mut total = None;
    let mut input = 0;
    let mut output = 0;

    for data in text.lines().filter_map(|l| l.strip_prefix("data:")) {
        let Ok(event) = serde_json::from_str::<Value>(data.trim()) else {
            continue;
        };
        // Anthropic reports input usage on message_start, output on message_delta.
        let usage = event
            .get("usage")
            .filter(|u| u.is_object())
            .or_else(|| event.pointer("/message/usage"));
        let Some(usage) = usage else {
            continue;
        };
        if let Some(t) = usage.get("total_tokens").and_then(Value::as_i64) {
            total = Some(t);
        }
        if let Some(t) = usage.get("input_tokens").and_then(Value::as_i64) {
            input = t;
        }
        if let Some(t) = usage.get("output_tokens").and_then(Value::as_i64) {
            output = t;
        }
    }

    total.unwrap_or(input + output)
}
