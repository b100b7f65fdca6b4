//! Authenticated request execution with a single refresh-and-retry.
//!
//! Every call walks `Attempt -> RefreshThenRetry -> Done`. A rejection in
//! `RefreshThenRetry` ends the call, so a request reaches the transport at most
//! twice no matter what the server answers.

use crate::auth::AuthCoordinator;
use crate::error::{ApiFailure, ApiResult};
use crate::transport::{
    ApiTransport, EventStream, HttpMethod, StreamHandshake, TransportError, TransportRequest,
    TransportResponse,
};
use futures::future::{AbortRegistration, Abortable};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const UNAUTHORIZED: u16 = 401;

/// One call as described by a collaborator; consumed by the executor.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub endpoint: String,
    pub method: HttpMethod,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Falls back to the executor's default when unset.
    pub timeout: Option<Duration>,
}

impl RequestContext {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, endpoint).with_body(body)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, endpoint)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn to_transport(&self, access_token: &str, timeout: Duration) -> TransportRequest {
        TransportRequest {
            method: self.method,
            endpoint: self.endpoint.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            bearer: Some(access_token.to_string()),
            timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Attempt,
    RefreshThenRetry,
}

enum Attempt<T> {
    Done(ApiResult<T>),
    Rejected,
}

#[derive(Clone)]
pub struct RequestExecutor {
    auth: AuthCoordinator,
    transport: Arc<dyn ApiTransport>,
    default_timeout: Duration,
}

impl RequestExecutor {
    pub fn new(
        auth: AuthCoordinator,
        transport: Arc<dyn ApiTransport>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            auth,
            transport,
            default_timeout,
        }
    }

    pub fn auth(&self) -> &AuthCoordinator {
        &self.auth
    }

    pub async fn execute(&self, context: RequestContext) -> ApiResult<Value> {
        let transport = self.transport.clone();
        self.drive(&context, move |request| {
            let transport = transport.clone();
            async move {
                let response = transport.send(request).await?;
                Ok::<_, TransportError>(classify(response))
            }
        })
        .await
    }

    pub async fn execute_json<T: DeserializeOwned>(&self, context: RequestContext) -> ApiResult<T> {
        let endpoint = context.endpoint.clone();
        let value = self.execute(context).await?;
        serde_json::from_value(value).map_err(|err| {
            ApiFailure::parse(format!("unexpected response from {endpoint}: {err}"))
        })
    }

    /// Like [`execute`](Self::execute), but cancellable through the matching
    /// `AbortHandle`. A cancelled call reports `Timeout`.
    pub async fn execute_abortable(
        &self,
        context: RequestContext,
        registration: AbortRegistration,
    ) -> ApiResult<Value> {
        let endpoint = context.endpoint.clone();
        match Abortable::new(self.execute(context), registration).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%endpoint, "request aborted");
                Err(ApiFailure::timeout(format!("request to {endpoint} was aborted")))
            }
        }
    }

    /// Open a streaming call under the same auth rules. Only the handshake is
    /// bounded by the timeout; reads last as long as the connection does.
    pub async fn open_stream(&self, context: RequestContext) -> ApiResult<EventStream> {
        let transport = self.transport.clone();
        self.drive(&context, move |request| {
            let transport = transport.clone();
            async move {
                let attempt = match transport.open_stream(request).await? {
                    StreamHandshake::Open(stream) => Attempt::Done(Ok(stream)),
                    StreamHandshake::Rejected(response) if response.status == UNAUTHORIZED => {
                        Attempt::Rejected
                    }
                    StreamHandshake::Rejected(response) => {
                        Attempt::Done(Err(ApiFailure::from_response(&response)))
                    }
                };
                Ok::<_, TransportError>(attempt)
            }
        })
        .await
    }

    async fn drive<T, F, Fut>(&self, context: &RequestContext, mut issue: F) -> ApiResult<T>
    where
        F: FnMut(TransportRequest) -> Fut,
        Fut: Future<Output = Result<Attempt<T>, TransportError>>,
    {
        let timeout = context.timeout.unwrap_or(self.default_timeout);
        let mut phase = Phase::Attempt;
        loop {
            let Some(credentials) = self.auth.store().get() else {
                return Err(ApiFailure::unauthorized("not signed in"));
            };
            debug!(endpoint = %context.endpoint, ?phase, "issuing request");
            let request = context.to_transport(&credentials.access_token, timeout);
            let attempt = match tokio::time::timeout(timeout, issue(request)).await {
                Ok(Ok(attempt)) => attempt,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    return Err(ApiFailure::timeout(format!(
                        "{} did not answer within {} ms",
                        context.endpoint,
                        timeout.as_millis()
                    )))
                }
            };
            match (attempt, phase) {
                (Attempt::Done(result), _) => return result,
                (Attempt::Rejected, Phase::Attempt) => {
                    if !self
                        .auth
                        .refresh_after_rejection(&credentials.access_token)
                        .await
                    {
                        warn!(endpoint = %context.endpoint, "token refresh failed");
                        self.auth.logout("token refresh failed");
                        return Err(ApiFailure::unauthorized("session expired"));
                    }
                    phase = Phase::RefreshThenRetry;
                }
                (Attempt::Rejected, Phase::RefreshThenRetry) => {
                    warn!(endpoint = %context.endpoint, "token rejected after refresh");
                    self.auth.logout("token rejected after refresh");
                    return Err(ApiFailure::unauthorized("token rejected after refresh"));
                }
            }
        }
    }
}

fn classify(response: TransportResponse) -> Attempt<Value> {
    if response.status == UNAUTHORIZED {
        return Attempt::Rejected;
    }
    if !response.is_success() {
        return Attempt::Done(Err(ApiFailure::from_response(&response)));
    }
    if response.body.trim().is_empty() {
        return Attempt::Done(Ok(Value::Null));
    }
    Attempt::Done(
        serde_json::from_str(&response.body)
            .map_err(|err| ApiFailure::parse(format!("response body is not JSON: {err}"))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> TransportResponse {
        TransportResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn classify_decodes_success_bodies() {
        match classify(response(200, r#"{"cases":[]}"#)) {
            Attempt::Done(Ok(value)) => assert_eq!(value["cases"], serde_json::json!([])),
            _ => panic!("expected decoded body"),
        }
        assert!(matches!(
            classify(response(204, "")),
            Attempt::Done(Ok(Value::Null))
        ));
    }

    #[test]
    fn classify_flags_parse_errors_and_rejections() {
        match classify(response(200, "<html>")) {
            Attempt::Done(Err(failure)) => {
                assert_eq!(failure.kind, crate::error::FailureKind::ParseError)
            }
            _ => panic!("expected parse failure"),
        }
        assert!(matches!(classify(response(401, "")), Attempt::Rejected));
    }

    #[test]
    fn context_builders_fill_fields() {
        let context = RequestContext::post("search/cases", serde_json::json!({ "q": "lease" }))
            .with_header("Accept-Language", "en")
            .with_timeout(Duration::from_millis(250));
        assert_eq!(context.method, HttpMethod::Post);
        assert_eq!(context.headers.len(), 1);
        let request = context.to_transport("token", Duration::from_millis(250));
        assert_eq!(request.bearer.as_deref(), Some("token"));
        assert_eq!(request.timeout, Duration::from_millis(250));
    }
}
