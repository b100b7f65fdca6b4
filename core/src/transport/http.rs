use super::{
    ApiTransport, HttpMethod, StreamHandshake, TransportError, TransportRequest,
    TransportResponse,
};
use crate::sse;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Method, RequestBuilder};
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    base_url: Url,
    http: Client,
}

impl ReqwestTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        // `Url::join` only appends when the base ends with a slash.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).with_context(|| format!("invalid API base URL {base_url}"))?;
        Ok(Self {
            base_url,
            http: Client::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resolve(&self, endpoint: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|err| TransportError::Network(format!("invalid endpoint {endpoint}: {err}")))
    }

    fn build(&self, request: &TransportRequest) -> Result<RequestBuilder, TransportError> {
        let url = self.resolve(&request.endpoint)?;
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        };
        let mut builder = self
            .http
            .request(method, url)
            .header("X-Request-Id", Uuid::new_v4().to_string());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        Ok(builder)
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}

#[async_trait]
impl ApiTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        debug!(method = request.method.as_str(), endpoint = %request.endpoint, "sending request");
        let response = self
            .build(&request)?
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        Ok(TransportResponse { status, body })
    }

    async fn open_stream(
        &self,
        request: TransportRequest,
    ) -> Result<StreamHandshake, TransportError> {
        debug!(endpoint = %request.endpoint, "opening event stream");
        // No per-request timeout here: it would also cut off the body, and the
        // stream lives as long as the upstream connection does.
        let response = self
            .build(&request)?
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(StreamHandshake::Rejected(TransportResponse {
                status: status.as_u16(),
                body,
            }));
        }
        let bytes = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(classify)
            .boxed();
        Ok(StreamHandshake::Open(sse::decode_event_stream(bytes)))
    }
}
