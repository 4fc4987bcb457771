//! WebSocket transport using `tokio-tungstenite`.

use async_trait::async_trait;
use bytes::Bytes;
use chatwire_core::ChannelId;
use chatwire_proto::ServerFrame;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};

use super::{ChannelEvent, ChannelLink, OpenRequest, Outgoing, Transport};
use crate::error::TransportError;

/// Production transport: one WebSocket per channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Create a new WebSocket transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, request: OpenRequest) -> Result<ChannelLink, TransportError> {
        tracing::debug!(channel = %request.channel, "opening websocket");

        let (stream, _response) = tokio_tungstenite::connect_async(request.url.as_str())
            .await
            .map_err(|e| TransportError::Connect { reason: e.to_string() })?;

        Ok(spawn_link(request.channel, stream))
    }
}

/// Drive an established WebSocket on its own task and expose it as a link.
///
/// Text frames are decoded into [`ServerFrame`]s. Unknown events and
/// malformed frames are logged and dropped; the channel stays open. The task
/// ends when the peer closes, the stream errors, or the outbound sender is
/// dropped.
pub fn spawn_link<S>(channel: ChannelId, stream: WebSocketStream<S>) -> ChannelLink
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (mut sink, mut source) = stream.split();

    tokio::spawn(async move {
        let closed_by_peer = loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    let message = match outgoing {
                        Some(Outgoing::Frame(frame)) => match frame.encode() {
                            Ok(text) => Message::text(text),
                            Err(e) => {
                                let event = frame.event_name();
                                tracing::error!(%channel, event, "encode failed: {}", e);
                                continue;
                            },
                        },
                        Some(Outgoing::Ping) => Message::Ping(Bytes::new()),
                        Some(Outgoing::Close) | None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break None;
                        },
                    };

                    if let Err(e) = sink.send(message).await {
                        break Some(e.to_string());
                    }
                },
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => match ServerFrame::decode(text.as_str()) {
                        Ok(frame) => {
                            let _ = inbound_tx.send(ChannelEvent::Frame(frame));
                        },
                        Err(e) if e.is_unknown_event() => {
                            tracing::debug!(%channel, "ignoring frame: {}", e);
                        },
                        Err(e) => {
                            tracing::warn!(%channel, "dropping malformed frame: {}", e);
                        },
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        let _ = inbound_tx.send(ChannelEvent::Heartbeat);
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break Some(frame.map_or_else(
                            || "closed by peer".to_string(),
                            |f| format!("closed by peer ({}): {}", f.code, f.reason.as_str()),
                        ));
                    },
                    Some(Ok(Message::Binary(_) | Message::Frame(_))) => {
                        tracing::debug!(%channel, "ignoring non-text frame");
                    },
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break Some("stream ended".to_string()),
                },
            }
        };

        match closed_by_peer {
            Some(reason) => {
                tracing::debug!(%channel, %reason, "websocket closed");
                let _ = inbound_tx.send(ChannelEvent::Closed { reason });
            },
            None => tracing::debug!(%channel, "websocket closed locally"),
        }
    });

    ChannelLink { outbound: outbound_tx, inbound: inbound_rx }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chatwire_proto::{ClientFrame, ConversationRef, Connected};
    use tokio::io::duplex;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use super::*;

    async fn pair() -> (ChannelLink, WebSocketStream<tokio::io::DuplexStream>) {
        let (client_io, server_io) = duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        (spawn_link(ChannelId(1), client), server)
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (mut link, mut server) = pair().await;

        let join = ClientFrame::JoinConversation(ConversationRef { conversation_id: "c1".into() });
        link.outbound.send(Outgoing::Frame(join.clone())).unwrap();
        let received = server.next().await.unwrap().unwrap();
        assert_eq!(ClientFrame::decode(received.to_text().unwrap()).unwrap(), join);

        server.send(Message::text(r#"{"event":"connected"}"#)).await.unwrap();
        assert_eq!(
            link.inbound.recv().await.unwrap(),
            ChannelEvent::Frame(ServerFrame::Connected(Connected::default()))
        );
    }

    #[tokio::test]
    async fn bad_frames_do_not_close_the_channel() {
        let (mut link, mut server) = pair().await;

        server.send(Message::text("not json")).await.unwrap();
        server.send(Message::text(r#"{"event":"presence","data":{}}"#)).await.unwrap();
        server.send(Message::Pong(Bytes::new())).await.unwrap();

        assert_eq!(link.inbound.recv().await.unwrap(), ChannelEvent::Heartbeat);
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (mut link, mut server) = pair().await;

        server.close(None).await.unwrap();

        match link.inbound.recv().await.unwrap() {
            ChannelEvent::Closed { reason } => assert!(reason.contains("closed")),
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_outbound_closes_quietly() {
        let (link, mut server) = pair().await;
        let ChannelLink { outbound, mut inbound } = link;

        drop(outbound);

        assert!(matches!(server.next().await, Some(Ok(Message::Close(_)))));
        assert_eq!(inbound.recv().await, None);
    }
}
