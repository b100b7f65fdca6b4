use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use lexgate_core::{
    telemetry, ChatStreamObserver, CompletedResponse, ConversationType, Endpoints,
    LegalApiClient, MemoryTokenStore, RequestContext, ScriptedReply, ScriptedTransport,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Lexgate")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run login, a refreshed request and a streamed answer against a scripted backend.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

#[derive(Default)]
struct Summary {
    chunks: usize,
    html: Option<String>,
    error: Option<String>,
}

impl ChatStreamObserver for Summary {
    fn on_chunk(&mut self, _html: &str) {
        self.chunks += 1;
    }

    fn on_error(&mut self, _partial_text: &str, message: &str) {
        self.error = Some(message.to_string());
    }

    fn on_complete(&mut self, response: CompletedResponse) {
        self.html = Some(response.html);
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let transport = ScriptedTransport::new();
    transport
        .push(
            "auth/login",
            ScriptedReply::json(
                200,
                json!({ "accessToken": "a0", "refreshToken": "r0", "expiresIn": 900 }),
            ),
        )
        .push("cases/recent", ScriptedReply::unauthorized())
        .push("cases/recent", ScriptedReply::json(200, json!({ "total": 1 })))
        .push(
            "auth/refresh",
            ScriptedReply::json(
                200,
                json!({ "accessToken": "a1", "refreshToken": "r1", "expiresIn": 900 }),
            ),
        )
        .push("chat/sessions", ScriptedReply::json(201, json!({ "id": 1 })))
        .push(
            "chat/stream",
            ScriptedReply::fragments(["**Smoke**", "test", "passed", "."]),
        );

    let (client, _events) = LegalApiClient::new(
        Arc::new(MemoryTokenStore::new()),
        Arc::new(transport.clone()),
        Endpoints::default(),
        Duration::from_secs(5),
    );

    runtime.block_on(async {
        client
            .auth()
            .login("smoke", "smoke")
            .await?;
        let recent = client
            .executor()
            .execute(RequestContext::get("cases/recent"))
            .await?;
        info!(total = %recent["total"], "authenticated request survived a token refresh");

        let mut sessions = client.chat_sessions();
        let mut summary = Summary::default();
        sessions
            .stream_reply("smoke test", ConversationType::Chat, &mut summary)
            .await?;
        if let Some(error) = summary.error {
            return Err(anyhow!("stream failed: {error}"));
        }
        info!(
            chunks = summary.chunks,
            html = summary.html.as_deref().unwrap_or_default(),
            "smoke test answer rendered"
        );
        Ok::<_, anyhow::Error>(())
    })?;

    info!(calls = transport.call_count(), "smoke test finished");
    Ok(())
}
