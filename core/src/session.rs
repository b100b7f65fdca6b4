use crate::assembler::{ChatStreamObserver, StreamState, StreamingChatAssembler};
use crate::config::Endpoints;
use crate::error::ApiResult;
use crate::executor::{RequestContext, RequestExecutor};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    #[default]
    Chat,
    Search,
}

/// A server-side conversation; lives until the user starts a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSession {
    pub id: String,
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: ConversationType,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SessionId {
    Text(String),
    Number(u64),
}

#[derive(Deserialize)]
struct CreatedSession {
    id: SessionId,
}

/// Holds the session of the active conversation. Owned by the collaborator
/// driving the conversation, never by the executor.
pub struct ChatSessions {
    executor: RequestExecutor,
    sessions_endpoint: String,
    stream_endpoint: String,
    current: Option<ChatSession>,
}

impl ChatSessions {
    pub fn new(executor: RequestExecutor, endpoints: &Endpoints) -> Self {
        Self {
            executor,
            sessions_endpoint: endpoints.sessions.clone(),
            stream_endpoint: endpoints.chat_stream.clone(),
            current: None,
        }
    }

    pub fn current(&self) -> Option<&ChatSession> {
        self.current.as_ref()
    }

    /// Return the held session id, creating the session on first use.
    pub async fn ensure_session(
        &mut self,
        first_message: &str,
        kind: ConversationType,
    ) -> ApiResult<String> {
        if let Some(session) = &self.current {
            return Ok(session.id.clone());
        }
        let subject = snippet(first_message);
        let context = RequestContext::post(
            self.sessions_endpoint.clone(),
            json!({
                "subject": subject,
                "firstMessage": first_message,
                "type": kind,
            }),
        );
        let created: CreatedSession = self.executor.execute_json(context).await?;
        let id = match created.id {
            SessionId::Text(id) => id,
            SessionId::Number(id) => id.to_string(),
        };
        info!(session = %id, ?kind, "created chat session");
        self.current = Some(ChatSession {
            id: id.clone(),
            subject,
            kind,
        });
        Ok(id)
    }

    /// Forget the held session so the next message opens a fresh one.
    pub fn new_conversation(&mut self) -> Option<ChatSession> {
        self.current.take()
    }

    /// Delete the held session server-side and forget it.
    pub async fn delete_session(&mut self) -> ApiResult<()> {
        let Some(session) = &self.current else {
            return Ok(());
        };
        let endpoint = format!(
            "{}/{}",
            self.sessions_endpoint.trim_end_matches('/'),
            session.id
        );
        self.executor.execute(RequestContext::delete(endpoint)).await?;
        self.current = None;
        Ok(())
    }

    /// Send `message` in the active conversation and stream the answer into
    /// `observer`. Nothing is sent without a session id.
    pub async fn stream_reply<O>(
        &mut self,
        message: &str,
        kind: ConversationType,
        observer: &mut O,
    ) -> ApiResult<StreamState>
    where
        O: ChatStreamObserver + ?Sized,
    {
        if message.trim().is_empty() {
            return Ok(StreamState::default());
        }
        let session_id = self.ensure_session(message, kind).await?;
        let context = RequestContext::post(
            self.stream_endpoint.clone(),
            json!({
                "sessionId": session_id,
                "message": message,
                "type": kind,
            }),
        );
        let stream = self.executor.open_stream(context).await?;
        Ok(StreamingChatAssembler::new().consume(stream, observer).await)
    }
}

fn snippet(content: &str) -> String {
    let trimmed = content.trim();
    const MAX: usize = 42;
    let mut chars = trimmed.chars();
    let mut acc = String::new();
    for _ in 0..MAX {
        if let Some(ch) = chars.next() {
            acc.push(ch);
        } else {
            return trimmed.to_string();
        }
    }
    if chars.next().is_none() {
        return acc;
    }
    acc.push('\u{2026}');
    acc
}
