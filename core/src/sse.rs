//! Server-Sent Events decoding for the chat stream.
//!
//! Default (`message`) events carry text fragments. `metadata`, `error` and
//! `done` events, and a `[DONE]` data line, carry the rest of the protocol.

use crate::transport::{EventStream, TransportError};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    #[default]
    Chat,
    Search,
    #[serde(other)]
    Unknown,
}

/// Details the service reports about how an answer was produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub vector_length: Option<usize>,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: ResponseKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(String),
    Metadata(StreamMetadata),
    Error(String),
    Done,
}

/// One dispatched SSE frame before interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn into_event(self) -> Option<StreamEvent> {
        if self.data.trim() == DONE_SENTINEL {
            return Some(StreamEvent::Done);
        }
        match self.event.as_deref().unwrap_or("message") {
            "message" => Some(StreamEvent::Fragment(fragment_text(self.data))),
            "metadata" => match serde_json::from_str::<StreamMetadata>(&self.data) {
                Ok(metadata) => Some(StreamEvent::Metadata(metadata)),
                Err(err) => {
                    warn!(%err, "discarding malformed stream metadata");
                    None
                }
            },
            "error" => Some(StreamEvent::Error(error_message(&self.data))),
            "done" | "end" => Some(StreamEvent::Done),
            other => {
                debug!(event = other, "ignoring unknown stream event");
                None
            }
        }
    }
}

fn error_message(data: &str) -> String {
    let parsed = serde_json::from_str::<Value>(data).ok();
    parsed
        .as_ref()
        .and_then(|value| value.get("message").or_else(|| value.get("error")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if data.trim().is_empty() {
                "stream failed".to_string()
            } else {
                data.to_string()
            }
        })
}

/// Fragments are usually raw text, but a JSON envelope with `content` or
/// `text` is unwrapped so that leading whitespace survives transport.
fn fragment_text(data: String) -> String {
    if data.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&data) {
            if let Some(text) = map
                .get("content")
                .or_else(|| map.get("text"))
                .and_then(Value::as_str)
            {
                return text.to_string();
            }
        }
    }
    data
}

/// Incremental line decoder; bytes may be split anywhere, including inside a
/// multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever is buffered once the byte stream has ended.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            let line = line.trim_end_matches('\r').to_string();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    /// A named event is dispatched even without data lines, so a bare
    /// `event: error` still reaches the consumer.
    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

struct DecodeState {
    bytes: BoxStream<'static, Result<Vec<u8>, TransportError>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamEvent, TransportError>>,
    exhausted: bool,
}

impl DecodeState {
    fn queue(&mut self, frame: SseFrame) {
        if let Some(event) = frame.into_event() {
            self.pending.push_back(Ok(event));
        }
    }
}

/// Turn a raw byte stream into protocol events.
pub fn decode_event_stream(
    bytes: BoxStream<'static, Result<Vec<u8>, TransportError>>,
) -> EventStream {
    let state = DecodeState {
        bytes,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        exhausted: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.exhausted {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.feed(&chunk) {
                        state.queue(frame);
                    }
                }
                Some(Err(err)) => {
                    state.exhausted = true;
                    state.pending.push_back(Err(err));
                }
                None => {
                    state.exhausted = true;
                    if let Some(frame) = state.decoder.finish() {
                        state.queue(frame);
                    }
                }
            }
        }
    })
    .boxed()
}

/// Decode a complete SSE body held in memory.
pub fn decode_body(body: &str) -> Vec<StreamEvent> {
    let mut decoder = SseDecoder::default();
    let mut frames = decoder.feed(body.as_bytes());
    frames.extend(decoder.finish());
    frames
        .into_iter()
        .filter_map(SseFrame::into_event)
        .collect()
}
