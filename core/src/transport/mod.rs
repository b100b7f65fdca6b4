//! The HTTP seam between the access layer and the legal-data service.
//!
//! `ApiTransport` performs exactly one exchange per call and knows nothing about
//! tokens beyond attaching the bearer it is handed. Auth retries, timeouts and
//! result normalization live in [`crate::executor`].

mod http;
mod scripted;

pub use http::ReqwestTransport;
pub use scripted::{RecordedCall, ScriptedReply, ScriptedTransport};

use crate::sse::StreamEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported HTTP method `{other}`")),
        }
    }
}

/// A fully prepared exchange, relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Network(String),
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, TransportError>>;

/// Outcome of opening a streaming call: either the stream is flowing or the
/// server answered with a plain (non-2xx) response.
pub enum StreamHandshake {
    Open(EventStream),
    Rejected(TransportResponse),
}

#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    async fn open_stream(
        &self,
        request: TransportRequest,
    ) -> Result<StreamHandshake, TransportError>;
}
