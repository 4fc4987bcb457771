//! In-process transport for tests.
//!
//! [`MemoryTransport`] hands every opened channel to the paired
//! [`MemoryServer`] as a [`ServerEnd`], which plays the backend: it can
//! acknowledge or reject the handshake, emit events, and close the channel.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chatwire_core::{BearerToken, ChannelId};
use chatwire_proto::{ClientFrame, ConnectError, Connected, InboundEvent, ServerFrame};
use tokio::sync::mpsc;

use super::{ChannelEvent, ChannelLink, OpenRequest, Outgoing, Transport};
use crate::error::TransportError;

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicUsize,
    failures_pending: AtomicUsize,
}

/// Client half of the in-memory transport.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    counters: Arc<Counters>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryTransport {
    /// Transport and the server that receives its channels.
    pub fn pair() -> (Self, MemoryServer) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let transport = Self { counters: Arc::clone(&counters), accepted: accepted_tx };
        (transport, MemoryServer { counters, accepted: accepted_rx })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, request: OpenRequest) -> Result<ChannelLink, TransportError> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);

        let fail = self
            .counters
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(TransportError::Connect { reason: "connection refused".to_string() });
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let end = ServerEnd {
            channel: request.channel,
            url: request.url,
            token: request.token,
            to_client: inbound_tx,
            from_client: outbound_rx,
        };
        self.accepted.send(end).map_err(|_| TransportError::Connect {
            reason: "memory server dropped".to_string(),
        })?;

        Ok(ChannelLink { outbound: outbound_tx, inbound: inbound_rx })
    }
}

/// Server half of the in-memory transport.
#[derive(Debug)]
pub struct MemoryServer {
    counters: Arc<Counters>,
    accepted: mpsc::UnboundedReceiver<ServerEnd>,
}

impl MemoryServer {
    /// Next opened channel.
    pub async fn accept(&mut self) -> Option<ServerEnd> {
        self.accepted.recv().await
    }

    /// Opened channel, if one is already waiting.
    pub fn try_accept(&mut self) -> Option<ServerEnd> {
        self.accepted.try_recv().ok()
    }

    /// Make the next `count` open attempts fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.counters.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Open attempts so far, including failed ones.
    pub fn open_attempts(&self) -> usize {
        self.counters.attempts.load(Ordering::SeqCst)
    }
}

/// Backend side of one channel.
#[derive(Debug)]
pub struct ServerEnd {
    channel: ChannelId,
    url: String,
    token: BearerToken,
    to_client: mpsc::UnboundedSender<ChannelEvent>,
    from_client: mpsc::UnboundedReceiver<Outgoing>,
}

impl ServerEnd {
    /// Channel attempt this end belongs to.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// URL the client opened.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Credential the client presented.
    pub fn token(&self) -> &BearerToken {
        &self.token
    }

    /// Accept the handshake.
    pub fn acknowledge(&self, session_id: Option<&str>) {
        self.send_frame(ServerFrame::Connected(Connected {
            session_id: session_id.map(str::to_string),
        }));
    }

    /// Refuse the handshake.
    pub fn reject(&self, message: &str) {
        self.send_frame(ServerFrame::ConnectError(ConnectError { message: message.to_string() }));
    }

    /// Push an application event.
    pub fn emit(&self, event: InboundEvent) {
        self.send_frame(ServerFrame::Event(event));
    }

    /// Answer a ping.
    pub fn heartbeat(&self) {
        let _ = self.to_client.send(ChannelEvent::Heartbeat);
    }

    /// Close the channel from the server side.
    pub fn close(&self, reason: &str) {
        let _ = self.to_client.send(ChannelEvent::Closed { reason: reason.to_string() });
    }

    /// Next item from the client, or `None` once the client dropped its
    /// side.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.from_client.recv().await
    }

    /// Item from the client, if one is already queued.
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        self.from_client.try_recv().ok()
    }

    /// Next application frame, skipping pings. `None` once the client
    /// closed the channel.
    pub async fn recv_frame(&mut self) -> Option<ClientFrame> {
        loop {
            match self.from_client.recv().await? {
                Outgoing::Frame(frame) => return Some(frame),
                Outgoing::Ping => {},
                Outgoing::Close => return None,
            }
        }
    }

    fn send_frame(&self, frame: ServerFrame) {
        let _ = self.to_client.send(ChannelEvent::Frame(frame));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(channel: u64) -> OpenRequest {
        OpenRequest {
            channel: ChannelId(channel),
            url: "ws://memory/messages?token=t".to_string(),
            token: BearerToken::new("t"),
        }
    }

    #[tokio::test]
    async fn open_hands_channel_to_server() {
        let (transport, mut server) = MemoryTransport::pair();
        let mut link = transport.open(request(1)).await.unwrap();
        let mut end = server.accept().await.unwrap();

        assert_eq!(end.channel(), ChannelId(1));
        assert_eq!(end.token(), &BearerToken::new("t"));

        end.acknowledge(Some("s-1"));
        assert!(matches!(
            link.inbound.recv().await,
            Some(ChannelEvent::Frame(ServerFrame::Connected(_)))
        ));

        link.outbound.send(Outgoing::Ping).unwrap();
        assert_eq!(end.recv().await, Some(Outgoing::Ping));
    }

    #[tokio::test]
    async fn injected_failures() {
        let (transport, mut server) = MemoryTransport::pair();
        server.fail_next_opens(1);

        assert!(transport.open(request(1)).await.is_err());
        assert!(transport.open(request(2)).await.is_ok());
        assert_eq!(server.open_attempts(), 2);
        assert_eq!(server.try_accept().map(|end| end.channel()), Some(ChannelId(2)));
    }
}
