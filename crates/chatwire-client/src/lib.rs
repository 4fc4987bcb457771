//! Chatwire client runtime.
//!
//! Tokio runtime around the sans-IO pieces in `chatwire-core`:
//!
//! ```text
//! chatwire-client
//!   ├─ MessagingClient   (command façade, cloneable handle)
//!   ├─ Driver            (single event-loop task per client context)
//!   ├─ Transport         (WsTransport for production, MemoryTransport for tests)
//!   └─ SystemEnv         (Tokio time, OS entropy)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use chatwire_client::{ClientConfig, Collaborators, MessagingClient};
//! use chatwire_core::{BearerToken, ConnectionState, SharedToken};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let token = SharedToken::with_token(BearerToken::new("eyJ..."));
//! let client = MessagingClient::init_websocket(
//!     ClientConfig::new("wss://chat.example.com"),
//!     Collaborators::new(token),
//! )?;
//!
//! let _sub = client.on_new_message(|message| {
//!     tracing::info!(from = %message.sender.name, "{}", message.content);
//! });
//! client.connect()?;
//! client.wait_for_state(ConnectionState::Connected).await?;
//! client.join_conversation("c1");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod driver;
mod error;
mod system_env;
pub mod transport;

pub use client::{Collaborators, MessagingClient};
pub use config::ClientConfig;
pub use error::{ClientError, CommandError, TransportError};
pub use system_env::SystemEnv;
pub use transport::{
    ChannelEvent, ChannelLink, OpenRequest, Outgoing, Transport,
    memory::{MemoryServer, MemoryTransport, ServerEnd},
    websocket::WsTransport,
};
