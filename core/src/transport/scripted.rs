use super::{
    ApiTransport, HttpMethod, StreamHandshake, TransportError, TransportRequest,
    TransportResponse,
};
use crate::sse::{self, StreamEvent};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// A canned answer for one call to an endpoint.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond { status: u16, body: String },
    Fail(TransportError),
    /// Never answers; useful for timeout and abort paths.
    Stall,
    Stream(Vec<Result<StreamEvent, TransportError>>),
    Delayed(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self::Respond {
            status,
            body: body.to_string(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::Respond {
            status,
            body: body.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::json(401, serde_json::json!({ "message": "token expired" }))
    }

    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events: Vec<_> = fragments
            .into_iter()
            .map(|fragment| Ok(StreamEvent::Fragment(fragment.into())))
            .collect();
        events.push(Ok(StreamEvent::Done));
        Self::Stream(events)
    }

    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub endpoint: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

/// In-process transport that replays queued replies per endpoint and records
/// every call it receives.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<HashMap<String, VecDeque<ScriptedReply>>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, endpoint: &str, reply: ScriptedReply) -> &Self {
        self.replies
            .lock()
            .entry(normalize(endpoint))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        let endpoint = normalize(endpoint);
        self.calls
            .lock()
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .count()
    }

    async fn next_reply(
        &self,
        request: &TransportRequest,
    ) -> Result<ScriptedReply, TransportError> {
        let endpoint = normalize(&request.endpoint);
        self.calls.lock().push(RecordedCall {
            method: request.method,
            endpoint: endpoint.clone(),
            bearer: request.bearer.clone(),
            body: request.body.clone(),
        });
        let mut reply = self
            .replies
            .lock()
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| TransportError::Network(format!("no scripted reply for {endpoint}")))?;
        while let ScriptedReply::Delayed(delay, inner) = reply {
            sleep(delay).await;
            reply = *inner;
        }
        if matches!(reply, ScriptedReply::Stall) {
            futures::future::pending::<()>().await;
        }
        Ok(reply)
    }
}

fn unresolved() -> TransportError {
    TransportError::Network("scripted reply was not resolved".to_string())
}

fn normalize(endpoint: &str) -> String {
    endpoint.trim_start_matches('/').to_string()
}

#[async_trait]
impl ApiTransport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        match self.next_reply(&request).await? {
            ScriptedReply::Respond { status, body } => Ok(TransportResponse { status, body }),
            ScriptedReply::Fail(err) => Err(err),
            ScriptedReply::Stream(_) => Err(TransportError::Network(
                "scripted stream used for a plain request".to_string(),
            )),
            ScriptedReply::Stall | ScriptedReply::Delayed(..) => Err(unresolved()),
        }
    }

    async fn open_stream(
        &self,
        request: TransportRequest,
    ) -> Result<StreamHandshake, TransportError> {
        match self.next_reply(&request).await? {
            ScriptedReply::Respond { status, body } if (200..300).contains(&status) => {
                let events: Vec<Result<StreamEvent, TransportError>> =
                    sse::decode_body(&body).into_iter().map(Ok).collect();
                Ok(StreamHandshake::Open(stream::iter(events).boxed()))
            }
            ScriptedReply::Respond { status, body } => {
                Ok(StreamHandshake::Rejected(TransportResponse { status, body }))
            }
            ScriptedReply::Fail(err) => Err(err),
            ScriptedReply::Stream(events) => {
                Ok(StreamHandshake::Open(stream::iter(events).boxed()))
            }
            ScriptedReply::Stall | ScriptedReply::Delayed(..) => Err(unresolved()),
        }
    }
}
