use chrono::{Duration as ChronoDuration, Utc};
use lexgate_core::sse::ResponseKind;
use lexgate_core::{
    ChatStreamObserver, CompletedResponse, ConversationType, Credentials, Endpoints,
    LegalApiClient, MemoryTokenStore, ScriptedReply, ScriptedTransport, StreamEvent,
    StreamMetadata,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn signed_in_client(transport: &ScriptedTransport) -> LegalApiClient {
    let store = MemoryTokenStore::with_credentials(Credentials {
        access_token: "a0".into(),
        refresh_token: "r0".into(),
        expires_at: Utc::now() + ChronoDuration::minutes(10),
    });
    let (client, _events) = LegalApiClient::new(
        Arc::new(store),
        Arc::new(transport.clone()),
        Endpoints::default(),
        Duration::from_secs(2),
    );
    client
}

#[derive(Default)]
struct Recorder {
    chunks: Vec<String>,
    errors: Vec<(String, String)>,
    completed: Vec<CompletedResponse>,
}

impl ChatStreamObserver for Recorder {
    fn on_chunk(&mut self, html: &str) {
        self.chunks.push(html.to_string());
    }

    fn on_error(&mut self, partial_text: &str, message: &str) {
        self.errors.push((partial_text.to_string(), message.to_string()));
    }

    fn on_complete(&mut self, response: CompletedResponse) {
        self.completed.push(response);
    }
}

#[test]
fn reply_streams_into_one_session() {
    let runtime = test_runtime();
    let transport = ScriptedTransport::new();
    transport
        .push("chat/sessions", ScriptedReply::json(201, json!({ "id": 41 })))
        .push("chat/stream", ScriptedReply::fragments(["The", "court", "held."]))
        .push("chat/stream", ScriptedReply::fragments(["Yes", "."]));
    let client = signed_in_client(&transport);
    let mut sessions = client.chat_sessions();

    let mut first = Recorder::default();
    let state = runtime
        .block_on(sessions.stream_reply(
            "What did the court hold?",
            ConversationType::Chat,
            &mut first,
        ))
        .expect("first reply");
    assert_eq!(state.accumulated_text, "The court held.");
    assert!(!state.is_streaming);
    assert!(!state.is_error);
    assert_eq!(first.chunks.len(), 3);
    assert_eq!(first.completed.len(), 1);
    assert!(first.completed[0].html.starts_with("<p>The court held.</p>"));

    let mut second = Recorder::default();
    runtime
        .block_on(sessions.stream_reply(
            "Is that binding?",
            ConversationType::Chat,
            &mut second,
        ))
        .expect("second reply");
    assert_eq!(second.completed[0].text, "Yes.");

    assert_eq!(transport.calls_to("chat/sessions"), 1);
    let stream_calls: Vec<_> = transport
        .calls()
        .into_iter()
        .filter(|call| call.endpoint == "chat/stream")
        .collect();
    assert_eq!(stream_calls.len(), 2);
    for call in &stream_calls {
        assert_eq!(call.body.as_ref().expect("body")["sessionId"], "41");
        assert_eq!(call.bearer.as_deref(), Some("a0"));
    }
    let created = transport
        .calls()
        .into_iter()
        .find(|call| call.endpoint == "chat/sessions")
        .expect("session creation call");
    assert_eq!(
        created.body,
        Some(json!({
            "subject": "What did the court hold?",
            "firstMessage": "What did the court hold?",
            "type": "chat",
        }))
    );
}

#[test]
fn new_conversation_opens_a_fresh_session() {
    let runtime = test_runtime();
    let transport = ScriptedTransport::new();
    transport
        .push("chat/sessions", ScriptedReply::json(201, json!({ "id": "s-1" })))
        .push("chat/sessions", ScriptedReply::json(201, json!({ "id": "s-2" })))
        .push("chat/stream", ScriptedReply::fragments(["one"]))
        .push("chat/stream", ScriptedReply::fragments(["two"]));
    let client = signed_in_client(&transport);
    let mut sessions = client.chat_sessions();
    let mut observer = Recorder::default();

    runtime
        .block_on(sessions.stream_reply(
            "first question",
            ConversationType::Search,
            &mut observer,
        ))
        .expect("first");
    let previous = sessions.new_conversation().expect("held session");
    assert_eq!(previous.id, "s-1");
    assert_eq!(previous.kind, ConversationType::Search);
    runtime
        .block_on(sessions.stream_reply(
            "second question",
            ConversationType::Search,
            &mut observer,
        ))
        .expect("second");

    assert_eq!(sessions.current().map(|s| s.id.as_str()), Some("s-2"));
    assert_eq!(transport.calls_to("chat/sessions"), 2);
}

#[test]
fn interrupted_answer_keeps_partial_text() {
    let runtime = test_runtime();
    let transport = ScriptedTransport::new();
    transport
        .push("chat/sessions", ScriptedReply::json(201, json!({ "id": 7 })))
        .push(
            "chat/stream",
            ScriptedReply::Stream(vec![
                Ok(StreamEvent::Fragment("Under".into())),
                Ok(StreamEvent::Fragment("section".into())),
                Ok(StreamEvent::Fragment("12".into())),
                Ok(StreamEvent::Error("upstream model unavailable".into())),
                Ok(StreamEvent::Fragment("ignored".into())),
            ]),
        );
    let client = signed_in_client(&transport);
    let mut sessions = client.chat_sessions();
    let mut observer = Recorder::default();

    let state = runtime
        .block_on(sessions.stream_reply(
            "Which section applies?",
            ConversationType::Chat,
            &mut observer,
        ))
        .expect("stream opened");

    assert!(state.is_error);
    assert!(!state.is_streaming);
    assert_eq!(state.accumulated_text, "Under section 12");
    assert_eq!(observer.chunks.len(), 3);
    assert!(observer.completed.is_empty());
    assert_eq!(
        observer.errors,
        vec![(
            "Under section 12".to_string(),
            "upstream model unavailable".to_string()
        )]
    );
}

#[test]
fn completion_carries_metadata_and_final_substitutions() {
    let runtime = test_runtime();
    let transport = ScriptedTransport::new();
    transport
        .push("chat/sessions", ScriptedReply::json(201, json!({ "id": 3 })))
        .push(
            "chat/stream",
            ScriptedReply::Stream(vec![
                Ok(StreamEvent::Metadata(StreamMetadata {
                    query: Some("adverse possession".into()),
                    vector_length: Some(4),
                    kind: ResponseKind::Search,
                })),
                Ok(StreamEvent::Fragment("See [the statute](https://law.example/s1)".into())),
                Ok(StreamEvent::Fragment("{{question: What is the limitation period?}}".into())),
                Ok(StreamEvent::Done),
            ]),
        );
    let client = signed_in_client(&transport);
    let mut sessions = client.chat_sessions();
    let mut observer = Recorder::default();

    runtime
        .block_on(sessions.stream_reply(
            "adverse possession",
            ConversationType::Search,
            &mut observer,
        ))
        .expect("reply");

    let completed = &observer.completed[0];
    assert_eq!(completed.metadata.query.as_deref(), Some("adverse possession"));
    assert_eq!(completed.metadata.kind, ResponseKind::Search);
    assert!(completed.html.contains("target=\"_blank\""));
    assert!(completed.html.contains("class=\"suggested-question\""));
    assert!(!completed.html.contains("{{question"));
}

#[test]
fn blank_message_sends_nothing() {
    let runtime = test_runtime();
    let transport = ScriptedTransport::new();
    let client = signed_in_client(&transport);
    let mut sessions = client.chat_sessions();
    let mut observer = Recorder::default();

    let state = runtime
        .block_on(sessions.stream_reply(
            "   ",
            ConversationType::Chat,
            &mut observer,
        ))
        .expect("no-op");

    assert_eq!(state.accumulated_text, "");
    assert_eq!(transport.call_count(), 0);
    assert!(sessions.current().is_none());
}
