use chrono::Utc;
use lexgate_core::{
    AuthEvent, Endpoints, FailureKind, LegalApiClient, PersistedTokenStore, RequestContext,
    ScriptedReply, ScriptedTransport, TokenStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn client_with_store(
    transport: &ScriptedTransport,
    store: PersistedTokenStore,
) -> (LegalApiClient, UnboundedReceiver<AuthEvent>) {
    LegalApiClient::new(
        Arc::new(store),
        Arc::new(transport.clone()),
        Endpoints::default(),
        Duration::from_secs(2),
    )
}

#[test]
fn login_survives_a_restart() {
    let runtime = test_runtime();
    let temp_dir = TempDir::new().expect("temp dir");
    let session_file = temp_dir.path().join("lexgate").join("session.json");
    let transport = ScriptedTransport::new();
    transport
        .push(
            "auth/login",
            ScriptedReply::json(
                200,
                json!({ "access_token": "a0", "refresh_token": "r0", "expires_in": 600 }),
            ),
        )
        .push("cases/recent", ScriptedReply::json(200, json!({ "total": 2 })));

    let (client, mut events) =
        client_with_store(&transport, PersistedTokenStore::open(&session_file));
    runtime
        .block_on(client.auth().login("counsel", "hunter2"))
        .expect("login");
    assert!(client.auth().is_signed_in());
    assert_eq!(runtime.block_on(events.recv()), Some(AuthEvent::SignedIn));
    assert_eq!(transport.calls()[0].bearer, None);

    let (restarted, _events) =
        client_with_store(&transport, PersistedTokenStore::open(&session_file));
    let stored = restarted.auth().store().get().expect("persisted credentials");
    assert_eq!(stored.access_token, "a0");
    assert_eq!(stored.refresh_token, "r0");
    assert!(stored.expires_at > Utc::now());

    let value = runtime
        .block_on(restarted.executor().execute(RequestContext::get("cases/recent")))
        .expect("authenticated call");
    assert_eq!(value["total"], 2);
    assert_eq!(transport.calls()[1].bearer.as_deref(), Some("a0"));
}

#[test]
fn logout_keeps_unrelated_session_entries() {
    let temp_dir = TempDir::new().expect("temp dir");
    let session_file = temp_dir.path().join("session.json");
    std::fs::write(
        &session_file,
        json!({
            "accessToken": "a0",
            "refreshToken": "r0",
            "expiresAt": (Utc::now() + chrono::Duration::minutes(5)).to_rfc3339(),
            "lastTab": "research",
        })
        .to_string(),
    )
    .expect("seed session file");

    let transport = ScriptedTransport::new();
    let (client, _events) =
        client_with_store(&transport, PersistedTokenStore::open(&session_file));
    assert!(client.auth().is_signed_in());

    client.auth().logout("user request");
    assert!(!client.auth().is_signed_in());

    let reopened = PersistedTokenStore::open(&session_file);
    assert!(reopened.get().is_none());
    assert_eq!(reopened.entry("lastTab"), Some(json!("research")));
}

#[test]
fn rejected_login_leaves_store_empty() {
    let runtime = test_runtime();
    let transport = ScriptedTransport::new();
    transport.push(
        "auth/login",
        ScriptedReply::json(401, json!({ "message": "invalid credentials" })),
    );
    let (client, _events) = client_with_store(&transport, PersistedTokenStore::in_memory());

    let failure = runtime
        .block_on(client.auth().login("counsel", "wrong"))
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Unauthorized);
    assert_eq!(failure.message, "invalid credentials");
    assert!(!client.auth().is_signed_in());
}
