//! Server-Sent Events decoding shared by the HTTP and stream transports
//!
//! An SSE body is a sequence of event blocks separated by blank lines. Each
//! block carries `event:`, `data:`, `id:` and `retry:` fields; lines that
//! start with `:` are comments. `\r\n` line endings are accepted.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, RwLock};

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Value of the `id:` field, if any.
    pub id: Option<String>,
}

impl SseEvent {
    /// Keep-alive events carry no message: `event: ping` or `data: [PING]`.
    pub fn is_ping(&self) -> bool {
        self.event
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("ping"))
            || self.data.eq_ignore_ascii_case("[ping]")
    }

    /// Whether this event carries a JSON-RPC message (no type, or `message`).
    pub fn is_message(&self) -> bool {
        !self.is_ping()
            && !self.data.is_empty()
            && self.event.as_deref().map_or(true, |e| e == "message")
    }
}

/// Parse a single event block (the text between two blank lines).
///
/// Returns `None` for blocks that contain only comments or nothing at all.
pub fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event = None;
    let mut id = None;
    let mut seen_field = false;

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event = Some(value.trim().to_string()),
            "id" => id = Some(value.trim().to_string()),
            // Reconnect timing is left to the caller.
            "retry" => {}
            _ => continue,
        }
        seen_field = true;
    }

    if !seen_field {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n").trim().to_string(),
        id,
    })
}

struct DecoderState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    ready: VecDeque<SseEvent>,
    finished: bool,
}

impl<S> DecoderState<S> {
    fn drain_complete_blocks(&mut self) {
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&block[..pos]);
            if let Some(event) = parse_event_block(&text) {
                self.ready.push_back(event);
            }
        }
    }
}

/// Decode a byte stream into a stream of [`SseEvent`]s.
///
/// The stream ends when the body ends or yields an error; a trailing block
/// without a terminating blank line is still delivered.
pub fn sse_events<S, E>(byte_stream: S) -> impl Stream<Item = SseEvent> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let state = DecoderState {
        inner: Box::pin(byte_stream),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.ready.pop_front() {
                return Some((event, st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));
                    st.drain_complete_blocks();
                }
                Some(Err(_)) | None => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    if let Some(event) = parse_event_block(&String::from_utf8_lossy(&rest)) {
                        st.ready.push_back(event);
                    }
                }
            }
        }
    })
}

/// Consume an SSE body and forward every message event's data to
/// `response_tx`, recording the last seen event id for resumption.
///
/// Ping events and non-message event types are dropped.
pub async fn forward_messages<S, E>(
    byte_stream: S,
    response_tx: mpsc::UnboundedSender<String>,
    last_event_id: Arc<RwLock<Option<String>>>,
) where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let events = sse_events(byte_stream);
    tokio::pin!(events);

    while let Some(event) = events.next().await {
        if let Some(id) = &event.id {
            *last_event_id.write().await = Some(id.clone());
        }
        if !event.is_message() {
            tracing::trace!(event = ?event.event, "dropping non-message SSE event");
            continue;
        }
        if response_tx.send(event.data).is_err() {
            break;
        }
    }
}
