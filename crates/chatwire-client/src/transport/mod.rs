//! Channel transports.
//!
//! A transport opens one physical channel per [`OpenRequest`] and hands back
//! a [`ChannelLink`]: an outbound queue and an inbound event stream. Frame
//! encoding and decoding happen inside the transport, so the driver only
//! sees typed frames.
//!
//! - [`websocket::WsTransport`]: production WebSocket transport
//! - [`memory::MemoryTransport`]: in-process transport for tests

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use chatwire_core::{BearerToken, ChannelId};
use chatwire_proto::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Request to open one channel.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Channel attempt this link belongs to.
    pub channel: ChannelId,
    /// Full URL including the credential query.
    pub url: String,
    /// Credential presented by this attempt.
    pub token: BearerToken,
}

/// Item queued for the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Application frame.
    Frame(ClientFrame),
    /// Heartbeat ping.
    Ping,
    /// Close the channel.
    Close,
}

/// Item received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Decoded frame.
    Frame(ServerFrame),
    /// Liveness signal with no payload (pong or ping).
    Heartbeat,
    /// The channel is gone. Last event on a link.
    Closed {
        /// Why.
        reason: String,
    },
}

/// Both directions of an open channel.
#[derive(Debug)]
pub struct ChannelLink {
    /// Queue towards the peer. Dropping it closes the channel.
    pub outbound: mpsc::UnboundedSender<Outgoing>,
    /// Events from the peer.
    pub inbound: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens channels to the messaging backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a channel and return its link once the socket is usable.
    ///
    /// The handshake acknowledgement arrives later as an inbound frame.
    async fn open(&self, request: OpenRequest) -> Result<ChannelLink, TransportError>;
}
