//! LAN-Chat client entry point.
//!
//! Joins a room on the local network and bridges it to the terminal: every
//! line typed on stdin is sent as a chat message, and every event the engine
//! reports is printed.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ net::resolve()        -- host name to socket address
//!  └─ ChatClient::join()    -- connect + AUTH
//!  └─ terminal loop
//!       ├─ stdin line      -> send_message / slash command
//!       ├─ ChatEvent       -> printed
//!       └─ Ctrl-C / /quit  -> leave
//! ```
//!
//! # Slash commands (for beginners)
//!
//! The server answers a bad secret key or a taken username with an ERROR
//! frame but keeps the connection open.  Instead of restarting the program
//! you can fix the field and authenticate again on the same connection:
//!
//! - `/key <KEY>`   – replace the secret key and re-send AUTH.
//! - `/name <NAME>` – replace the username and re-send AUTH.
//! - `/quit`        – leave the room.

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use lanchat_client::{ChatClient, JoinRequest};
use lanchat_core::net;
use lanchat_core::{ChannelSink, ChatEvent, ErrorBatch, RetryPolicy, Severity};

/// Join a LAN-Chat room.
#[derive(Debug, Parser)]
#[command(name = "lanchat-client", version, about)]
struct Args {
    /// Host name or IP address of the room's server.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port of the room's server.
    #[arg(long, default_value_t = 6666)]
    port: u16,

    /// The room's 24-character secret key.
    #[arg(long, env = "LANCHAT_SECRET_KEY", default_value = "")]
    key: String,

    /// Display name, at most 20 characters.
    #[arg(long)]
    username: String,

    /// Connection attempts before giving up.
    #[arg(long, default_value_t = 3)]
    retry_attempts: u32,

    /// Pause between connection attempts, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    retry_pause_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut batch = ErrorBatch::new();
    let server = match net::resolve(&args.host, args.port, &mut batch).await {
        Ok(addr) => addr,
        Err(_) => anyhow::bail!("{batch}"),
    };

    let (sink, mut events) = ChannelSink::new();
    let retry = RetryPolicy::new(
        args.retry_attempts,
        std::time::Duration::from_millis(args.retry_pause_ms),
    );
    let client = ChatClient::new(Arc::new(sink), retry);

    let mut request = JoinRequest::regular(server, args.key, args.username);
    client.join(&request).await?;
    info!(%server, "joining chat room");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Command::Quit => break,
                    Command::Key(key) => {
                        request.secret_key = key.to_string();
                        rejoin(&client, &request).await;
                    }
                    Command::Name(name) => {
                        request.username = name.to_string();
                        rejoin(&client, &request).await;
                    }
                    Command::Say(text) if text.is_empty() => {}
                    Command::Say(text) => {
                        if let Err(e) = client.send_message(text).await {
                            eprintln!("! {e}");
                        }
                    }
                }
            }

            Some(event) = events.recv() => {
                let fatal = matches!(
                    event,
                    ChatEvent::Error { severity: Severity::Critical, .. }
                );
                print_event(&event);
                if fatal && !client.is_running() {
                    break;
                }
            }
        }
    }

    client.leave().await;
    // Flush whatever the teardown reported.
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
    debug!("client exited");
    Ok(())
}

async fn rejoin(client: &ChatClient, request: &JoinRequest) {
    if let Err(e) = client.join(request).await {
        eprintln!("! {e}");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Key(&'a str),
    Name(&'a str),
    Say(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed == "/quit" {
        Command::Quit
    } else if let Some(key) = trimmed.strip_prefix("/key ") {
        Command::Key(key.trim())
    } else if let Some(name) = trimmed.strip_prefix("/name ") {
        Command::Name(name.trim())
    } else {
        Command::Say(trimmed)
    }
}

fn print_event(event: &ChatEvent) {
    match event {
        ChatEvent::Message { sender, text } => println!("{sender}: {text}"),
        ChatEvent::ServerError { kind, text } => println!("! server error ({kind}): {text}"),
        ChatEvent::Notification { kind, text } if text.is_empty() => println!("* {kind}"),
        ChatEvent::Notification { kind, text } => println!("* {kind}: {text}"),
        ChatEvent::Error { message, severity } => {
            eprintln!("! [{severity}] {}", message.trim_end());
        }
    }
}
