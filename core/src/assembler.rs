use crate::render;
use crate::sse::{StreamEvent, StreamMetadata};
use crate::transport::EventStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What the collaborator shows while an answer is arriving.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub accumulated_text: String,
    pub is_streaming: bool,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedResponse {
    /// Final sanitized HTML, with presentation substitutions applied.
    pub html: String,
    /// The joined raw text the HTML was rendered from.
    pub text: String,
    pub metadata: StreamMetadata,
}

/// Receives the output of a streamed answer. `on_chunk` fires once per
/// fragment in arrival order, followed by exactly one of `on_error` or
/// `on_complete`.
pub trait ChatStreamObserver {
    fn on_chunk(&mut self, html: &str);

    fn on_error(&mut self, partial_text: &str, message: &str);

    fn on_complete(&mut self, response: CompletedResponse);
}

/// Adapts three closures into a [`ChatStreamObserver`].
pub struct StreamCallbacks<C, E, D> {
    on_chunk: C,
    on_error: E,
    on_complete: D,
}

impl<C, E, D> StreamCallbacks<C, E, D>
where
    C: FnMut(&str),
    E: FnMut(&str, &str),
    D: FnMut(CompletedResponse),
{
    pub fn new(on_chunk: C, on_error: E, on_complete: D) -> Self {
        Self {
            on_chunk,
            on_error,
            on_complete,
        }
    }
}

impl<C, E, D> ChatStreamObserver for StreamCallbacks<C, E, D>
where
    C: FnMut(&str),
    E: FnMut(&str, &str),
    D: FnMut(CompletedResponse),
{
    fn on_chunk(&mut self, html: &str) {
        (self.on_chunk)(html)
    }

    fn on_error(&mut self, partial_text: &str, message: &str) {
        (self.on_error)(partial_text, message)
    }

    fn on_complete(&mut self, response: CompletedResponse) {
        (self.on_complete)(response)
    }
}

/// Turns a fragment stream into live, sanitized HTML.
///
/// The whole buffer is re-rendered on every fragment: lists, links and
/// emphasis can only be closed correctly once enough text has arrived.
#[derive(Debug)]
pub struct StreamingChatAssembler {
    state: StreamState,
    metadata: StreamMetadata,
    fragments: usize,
}

impl Default for StreamingChatAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingChatAssembler {
    pub fn new() -> Self {
        Self {
            state: StreamState {
                accumulated_text: String::new(),
                is_streaming: true,
                is_error: false,
            },
            metadata: StreamMetadata::default(),
            fragments: 0,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Append a fragment and return the re-rendered buffer. Returns `None`
    /// once the stream has been finalized.
    pub fn push_fragment(&mut self, fragment: &str) -> Option<String> {
        if !self.state.is_streaming {
            return None;
        }
        render::join_fragment(&mut self.state.accumulated_text, fragment);
        self.fragments += 1;
        Some(render::render(&self.state.accumulated_text))
    }

    pub fn record_metadata(&mut self, metadata: StreamMetadata) {
        self.metadata = metadata;
    }

    /// Mark the stream as failed, keeping whatever text arrived.
    pub fn fail(&mut self) -> Option<&str> {
        if !self.state.is_streaming {
            return None;
        }
        self.state.is_streaming = false;
        self.state.is_error = true;
        Some(&self.state.accumulated_text)
    }

    pub fn finish(&mut self) -> Option<CompletedResponse> {
        if !self.state.is_streaming {
            return None;
        }
        self.state.is_streaming = false;
        Some(CompletedResponse {
            html: render::render_final(&self.state.accumulated_text),
            text: self.state.accumulated_text.clone(),
            metadata: self.metadata.clone(),
        })
    }

    /// Drive `stream` to its end, reporting to `observer`, and hand back the
    /// final state.
    pub async fn consume<O>(mut self, mut stream: EventStream, observer: &mut O) -> StreamState
    where
        O: ChatStreamObserver + ?Sized,
    {
        while let Some(item) = stream.next().await {
            let message = match item {
                Ok(StreamEvent::Fragment(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    if let Some(html) = self.push_fragment(&fragment) {
                        observer.on_chunk(&html);
                    }
                    continue;
                }
                Ok(StreamEvent::Metadata(metadata)) => {
                    self.record_metadata(metadata);
                    continue;
                }
                Ok(StreamEvent::Done) => break,
                Ok(StreamEvent::Error(message)) => message,
                Err(err) => err.to_string(),
            };
            warn!(fragments = self.fragments, %message, "answer stream failed");
            if let Some(partial) = self.fail() {
                observer.on_error(partial, &message);
            }
            return self.state;
        }

        debug!(fragments = self.fragments, "answer stream completed");
        if let Some(response) = self.finish() {
            observer.on_complete(response);
        }
        self.state
    }
}
