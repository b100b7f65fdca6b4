use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use lexgate::{parse_chat_input, ChatInput, TerminalObserver};
use lexgate_core::{
    telemetry, ApiSettings, AuthEvent, ConversationType, HttpMethod, LegalApiClient,
    RequestContext,
};
use std::io::{self, BufRead, Write};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "lexgate", version, about = "Command-line access to the legal portal API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the issued tokens in the session file.
    Login {
        #[arg(long)]
        username: String,
        /// Read from the first line of stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored tokens.
    Logout,
    /// Report whether a valid token is stored.
    Status,
    /// Send one authenticated request and print the JSON answer.
    Request {
        method: HttpMethod,
        endpoint: String,
        #[arg(long)]
        body: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Interactive chat. `/new` starts a new conversation, `/quit` leaves.
    Chat {
        #[arg(long)]
        search: bool,
    },
}

fn main() -> anyhow::Result<()> {
    telemetry::init_tracing(telemetry::default_filter())?;

    let cli = Cli::parse();
    let settings = ApiSettings::load().map_err(|err| anyhow!(err.user_message()))?;
    let runtime = Runtime::new()?;

    runtime.block_on(async move {
        let (client, events) = LegalApiClient::from_settings(&settings)?;
        tokio::spawn(watch_auth_events(events));
        run(cli.command, &client).await
    })
}

async fn run(command: Command, client: &LegalApiClient) -> anyhow::Result<()> {
    match command {
        Command::Login { username, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            let credentials = client
                .auth()
                .login(&username, &password)
                .await
                .map_err(|failure| anyhow!(failure.user_message()))?;
            println!("Signed in until {}", credentials.expires_at.to_rfc3339());
        }
        Command::Logout => {
            client.auth().logout("requested from the command line");
            println!("Signed out");
        }
        Command::Status => {
            if client.auth().is_signed_in() {
                println!("Signed in");
            } else {
                println!("Not signed in");
            }
        }
        Command::Request {
            method,
            endpoint,
            body,
            timeout_ms,
        } => {
            let mut context = RequestContext::new(method, endpoint);
            if let Some(body) = body {
                let body = serde_json::from_str(&body).context("--body must be valid JSON")?;
                context = context.with_body(body);
            }
            if let Some(ms) = timeout_ms {
                context = context.with_timeout(Duration::from_millis(ms));
            }
            let value = client
                .executor()
                .execute(context)
                .await
                .map_err(|failure| anyhow!(failure.user_message()))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Chat { search } => {
            let kind = if search {
                ConversationType::Search
            } else {
                ConversationType::Chat
            };
            chat_loop(client, kind).await?;
        }
    }
    Ok(())
}

async fn chat_loop(client: &LegalApiClient, kind: ConversationType) -> anyhow::Result<()> {
    let mut sessions = client.chat_sessions();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        match parse_chat_input(&line) {
            ChatInput::Quit => break,
            ChatInput::Empty => continue,
            ChatInput::NewConversation => {
                if let Some(previous) = sessions.new_conversation() {
                    info!(session = %previous.id, "left conversation");
                }
                println!("Started a new conversation");
            }
            ChatInput::Message(message) => {
                let mut observer = TerminalObserver::new(io::stdout(), io::stderr());
                if let Err(failure) = sessions.stream_reply(message, kind, &mut observer).await {
                    eprintln!("{}", failure.user_message());
                }
            }
        }
    }
    Ok(())
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut password = String::new();
    io::stdin().lock().read_line(&mut password)?;
    Ok(password.trim_end_matches(['\r', '\n']).to_string())
}

async fn watch_auth_events(mut events: UnboundedReceiver<AuthEvent>) {
    while let Some(event) = events.recv().await {
        if let AuthEvent::SignedOut { reason } = event {
            warn!(%reason, "session ended, run `lexgate login` to sign in again");
        }
    }
}
