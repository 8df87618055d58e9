//! Pawlink CLI - follows chat topics and unread state from the terminal.
//!
//! This is the main binary entry point. See the `pawlink` library for the
//! core functionality.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use pawlink::{ChatApi, ChatId, Config, ConnectionState, RealtimeClient};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "pawlink")]
#[command(version)]
#[command(about = "Real-time chat and unread-state client over STOMP/WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow chat topics and print unread transitions
    Listen {
        /// Chat to subscribe to (repeatable); defaults to every chat in the snapshot
        #[arg(long = "chat")]
        chats: Vec<String>,
        /// Skip fetching the chat list snapshot
        #[arg(long)]
        no_snapshot: bool,
    },
    /// Publish one JSON message to an application destination
    Send {
        /// Destination without the /app prefix, e.g. /chat/42
        #[arg(long)]
        destination: String,
        /// JSON message body
        #[arg(long)]
        json: String,
        /// Seconds to wait for the connection
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

fn build_client(config: &Config) -> RealtimeClient {
    let session_config = config.session_config().on_error(|report| {
        log::warn!("[STOMP] {}", report.message);
        if !report.body.is_empty() {
            log::debug!("[STOMP] error body: {}", report.body);
        }
    });
    RealtimeClient::new(session_config)
}

async fn listen(config: Config, mut chats: Vec<String>, no_snapshot: bool) -> Result<()> {
    let mut client = build_client(&config);

    if !no_snapshot {
        let api = ChatApi::new(&config.server_url, config.token.clone())?;
        match client.load_unread_snapshot(&api, &config.user_id).await {
            Ok(count) => log::info!("Loaded unread state for {} chat(s)", count),
            Err(e) => log::warn!("Could not load chat list: {:#}", e),
        }
        if chats.is_empty() {
            chats = client
                .unread()
                .snapshot()
                .indicators()
                .keys()
                .map(ToString::to_string)
                .collect();
        }
    }

    let mut unread_rx = client.unread().subscribe();
    tokio::spawn(async move {
        while unread_rx.changed().await.is_ok() {
            let snap = unread_rx.borrow_and_update().clone();
            log::info!(
                "[Unread] any={} (revision {})",
                snap.has_unread(),
                snap.revision()
            );
        }
    });

    let handle = client.connect(&config.user_id, config.token.as_deref());
    let mut state_rx = handle.watch_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            log::info!("[STOMP] state: {:?}", state);
        }
    });

    tokio::select! {
        up = handle.connected() => {
            if !up {
                anyhow::bail!("Connection closed before it was established");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            client.disconnect();
            return Ok(());
        }
    }

    for chat in chats {
        let id = ChatId::from(chat);
        let label = id.clone();
        if client
            .track_unread(id, move |msg| println!("[{}] {}", label, msg))
            .is_none()
        {
            log::warn!("Subscription dropped: connection lost");
        }
    }

    println!("Listening. Press Ctrl-C to exit.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    println!("Shutting down...");
    client.disconnect();
    Ok(())
}

async fn send(config: Config, destination: &str, json: &str, timeout: Duration) -> Result<()> {
    let body: serde_json::Value = serde_json::from_str(json).context("--json is not valid JSON")?;

    let mut client = build_client(&config);
    let handle = client.connect(&config.user_id, config.token.as_deref());

    let connected = tokio::time::timeout(timeout, handle.connected())
        .await
        .unwrap_or(false);
    if !connected {
        client.disconnect();
        anyhow::bail!("Not connected after {}s", timeout.as_secs());
    }

    let queued = client.send_to_app(destination, &body);
    let mut state_rx = handle.watch_state();
    client.disconnect();
    // Let the connection task flush the SEND and DISCONNECT frames.
    let _ = tokio::time::timeout(
        Duration::from_secs(2),
        state_rx.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await;
    if !queued {
        anyhow::bail!("Connection lost before the message was queued");
    }
    println!("Sent to /app{}", destination);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    if config.user_id.is_empty() {
        log::warn!("No user id configured (set PAWLINK_USER_ID)");
    }

    match cli.command {
        Commands::Listen { chats, no_snapshot } => listen(config, chats, no_snapshot).await,
        Commands::Send {
            destination,
            json,
            timeout,
        } => send(config, &destination, &json, Duration::from_secs(timeout)).await,
    }
}
