//! LAN-Chat server entry point.
//!
//! Hosts a chat room on this machine and joins it as the admin.  Lines typed
//! on stdin are sent as the admin's messages; every event the engine reports
//! is printed.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()        -- TOML file, then command-line overrides
//!  └─ host_room()
//!       ├─ start_server()  -- accept loop + one handler per connection
//!       ├─ admin join      -- loopback ChatClient with the Admin role
//!       ├─ LAN address lookup
//!       └─ public IP lookup
//!  └─ terminal loop until Ctrl-C or /quit
//!  └─ HostedRoom::close()
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lanchat_core::{ChannelSink, ChatEvent};
use lanchat_server::application::host_room::host_room;
use lanchat_server::infrastructure::network::public_ip::HttpIpResolver;
use lanchat_server::infrastructure::storage::config::{load_config, load_config_from};

/// Host a LAN-Chat room.
#[derive(Debug, Parser)]
#[command(name = "lanchat-server", version, about)]
struct Args {
    /// The host's display name in the room, at most 20 characters.
    #[arg(long)]
    admin: String,

    /// Configuration file; defaults to the platform config directory.
    #[arg(long, env = "LANCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `server.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides `server.bind_address`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("loading configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level)),
        )
        .init();

    info!("LAN-Chat server starting");

    let (sink, mut events) = ChannelSink::new();
    let room = host_room(
        &args.admin,
        &config,
        Arc::new(sink),
        &HttpIpResolver::default(),
    )
    .await
    .context("opening chat room")?;

    println!("Room open on port {}", room.port());
    println!("Secret key: {}", room.secret_key());
    match room.lan_ip() {
        Some(ip) => println!("LAN address: {}", SocketAddr::new(ip, room.port())),
        None => println!("LAN address unknown"),
    }
    match room.public_ip() {
        Some(ip) => println!("Public address: {ip}:{}", room.port()),
        None => println!("Public address unknown; peers outside this network cannot join"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim_end_matches(['\r', '\n']);
                if text == "/quit" {
                    break;
                }
                if !text.is_empty() {
                    if let Err(e) = room.admin().send_message(text).await {
                        eprintln!("! {e}");
                    }
                }
            }

            Some(event) = events.recv() => print_event(&event),
        }
    }

    room.close().await;
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
    info!("LAN-Chat server stopped");
    Ok(())
}

fn print_event(event: &ChatEvent) {
    match event {
        ChatEvent::Message { sender, text } => println!("{sender}: {text}"),
        ChatEvent::ServerError { kind, text } => println!("! server error ({kind}): {text}"),
        ChatEvent::Notification { kind, text } => println!("* {kind}: {text}"),
        ChatEvent::Error { message, severity } => {
            eprintln!("! [{severity}] {}", message.trim_end());
        }
    }
}
