//! Chatwire tail: connect, join conversations, log every inbound event.
//!
//! # Usage
//!
//! ```bash
//! CHATWIRE_TOKEN=eyJ... chatwire-tail --endpoint wss://chat.example.com --join c1 --join c2
//! ```

use std::time::Duration;

use chatwire_client::{ClientConfig, Collaborators, MessagingClient};
use chatwire_core::{BearerToken, ConnectionState, SharedToken};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chatwire event tail
#[derive(Parser, Debug)]
#[command(name = "chatwire-tail")]
#[command(about = "Tail events from a chatwire messaging backend")]
#[command(version)]
struct Args {
    /// Backend base URL (ws:// or wss://)
    #[arg(short, long, default_value = "ws://127.0.0.1:3000")]
    endpoint: String,

    /// Messaging namespace
    #[arg(short, long, default_value = "messages")]
    namespace: String,

    /// Bearer token
    #[arg(short, long, env = "CHATWIRE_TOKEN", hide_env_values = true)]
    token: String,

    /// Conversation to join once connected (repeatable)
    #[arg(short, long)]
    join: Vec<String>,

    /// Fixed reconnect delay in milliseconds
    #[arg(long, default_value = "3000")]
    reconnect_delay_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.endpoint.clone());
        config.namespace.clone_from(&self.namespace);
        config.connection.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.client_config();
    config.validate()?;

    tracing::info!("Connecting to {}", config.channel_url());

    let tokens = SharedToken::with_token(BearerToken::new(args.token));
    let client = MessagingClient::init_websocket(config, Collaborators::new(tokens))?;

    let _subscriptions = [
        client.on_new_message(|m| {
            let from = &m.sender.name;
            tracing::info!(conversation = %m.conversation_id, %from, "{}", m.content);
        }),
        client.on_message_sent(|s| tracing::info!(id = %s.message.id, "message sent")),
        client.on_message_error(|e| tracing::warn!(code = ?e.code, "send failed: {}", e.error)),
        client.on_message_read(|r| tracing::info!(message = %r.message_id, "message read")),
        client.on_conversation_updated(|u| {
            tracing::info!(conversation = %u.conversation_id, unread = ?u.unread_count, "updated");
        }),
        client.on_user_typing(|t| {
            let typing = t.is_typing;
            tracing::info!(conversation = %t.conversation_id, user = t.user_id, typing);
        }),
        client.on_mark_read_error(|e| tracing::warn!(code = ?e.code, "read failed: {}", e.error)),
    ];

    // Re-join is handled by the client after reconnects; join on first connect.
    let joiner = client.clone();
    let join = args.join;
    let mut states = client.subscribe_state();
    tokio::spawn(async move {
        if states.wait_for(|s| *s == ConnectionState::Connected).await.is_ok() {
            for conversation in join {
                joiner.join_conversation(conversation);
            }
        }
    });

    client.connect()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    client.teardown().await;

    Ok(())
}
