use crate::transport::{TransportError, TransportResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest raw body excerpt carried in a failure message.
const MAX_RAW_MESSAGE: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No token, or the token was rejected even after a refresh.
    Unauthorized,
    /// Deadline exceeded or the call was aborted.
    Timeout,
    NetworkError,
    ServerError,
    /// 2xx response whose body could not be decoded.
    ParseError,
}

/// The uniform failure shape handed to collaborators.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct ApiFailure {
    pub kind: FailureKind,
    pub message: String,
    pub status: Option<u16>,
}

pub type ApiResult<T = serde_json::Value> = std::result::Result<T, ApiFailure>;

impl ApiFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unauthorized, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NetworkError, message)
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ServerError,
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ParseError, message)
    }

    /// Describe a non-2xx response, preferring a structured error body over raw
    /// text over the bare status.
    pub fn from_response(response: &TransportResponse) -> Self {
        let message = structured_message(&response.body)
            .or_else(|| raw_message(&response.body))
            .unwrap_or_else(|| format!("HTTP {}", response.status));
        if response.status == 401 {
            return Self {
                status: Some(401),
                ..Self::unauthorized(message)
            };
        }
        Self::server(response.status, message)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == FailureKind::Unauthorized
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self.kind {
            FailureKind::Unauthorized => {
                "Your session has ended. Please sign in again.".to_string()
            }
            FailureKind::Timeout => "The legal-data service did not answer in time.".to_string(),
            FailureKind::NetworkError => {
                format!("Could not reach the legal-data service: {}", self.message)
            }
            FailureKind::ServerError | FailureKind::ParseError => self.message.clone(),
        }
    }
}

impl From<TransportError> for ApiFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::timeout("the request timed out"),
            TransportError::Network(detail) => Self::network(detail),
        }
    }
}

fn structured_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    for key in ["message", "detail", "error", "title"] {
        match value.get(key) {
            Some(Value::String(text)) if !text.trim().is_empty() => return Some(text.clone()),
            Some(nested @ Value::Object(_)) => {
                if let Some(text) = nested.get("message").and_then(Value::as_str) {
                    return Some(text.to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn raw_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_RAW_MESSAGE).collect())
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
    fn prefers_structured_message() {
        let failure = ApiFailure::from_response(&response(
            422,
            r#"{"title":"Unprocessable","detail":"court code is unknown"}"#,
        ));
        assert_eq!(failure.kind, FailureKind::ServerError);
        assert_eq!(failure.status, Some(422));
        assert_eq!(failure.message, "court code is unknown");
    }

    #[test]
    fn reads_nested_error_objects() {
        let failure =
            ApiFailure::from_response(&response(500, r#"{"error":{"message":"index offline"}}"#));
        assert_eq!(failure.message, "index offline");
    }

    #[test]
    fn falls_back_to_raw_text_then_status() {
        let failure = ApiFailure::from_response(&response(502, "<html>Bad Gateway</html>"));
        assert_eq!(failure.message, "<html>Bad Gateway</html>");

        let failure = ApiFailure::from_response(&response(503, "  "));
        assert_eq!(failure.message, "HTTP 503");
    }

    #[test]
    fn transport_errors_map_to_kinds() {
        assert_eq!(ApiFailure::from(TransportError::Timeout).kind, FailureKind::Timeout);
        assert_eq!(
            ApiFailure::from(TransportError::Network("reset".into())).kind,
            FailureKind::NetworkError
        );
    }
}
