//! Scripted messaging backend for simulation.
//!
//! Speaks the real wire protocol over turmoil TCP: WebSocket upgrade, the
//! `connected` handshake frame, echoes for `send_message` and `mark_as_read`,
//! and a greeting `new_message` from a peer whenever a conversation is joined.

use std::{
    error::Error,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chatwire_proto::{
    ClientFrame, ConnectError, Connected, ConversationId, InboundEvent, Message, MessageRead,
    MessageSent, Sender, ServerFrame, UserId,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use percent_encoding::percent_decode_str;
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async,
    tungstenite::{
        Message as WsMessage,
        handshake::server::{ErrorResponse, Request, Response},
    },
};
use turmoil::net::{TcpListener, TcpStream};

/// User ID the backend attributes the client's own messages to.
pub const CLIENT_USER_ID: UserId = 1;

/// User ID of the peer that greets every joined conversation.
pub const PEER_USER_ID: UserId = 2;

/// How the backend answers a new channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServerBehavior {
    /// Acknowledge the handshake and serve the channel.
    #[default]
    Accept,
    /// Answer with `connect_error` and close.
    Reject {
        /// Error message sent to the client.
        message: String,
    },
    /// Acknowledge, then close immediately.
    DropAfterHandshake,
    /// Never acknowledge; wait for the client to give up.
    Silent,
}

/// What the backend has observed so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// WebSocket upgrades completed.
    pub connections: usize,
    /// Simulated time of each upgrade.
    pub accepted_at: Vec<Duration>,
    /// Tokens presented, in connection order.
    pub tokens: Vec<String>,
    /// Handshakes acknowledged.
    pub acknowledged: usize,
    /// `send_message` frames received.
    pub messages: usize,
    /// `mark_as_read` frames received.
    pub reads: usize,
    /// Conversations joined, in order, across all connections.
    pub joins: Vec<ConversationId>,
    /// Conversations left, in order.
    pub leaves: Vec<ConversationId>,
}

/// Simulated backend. Clones share behavior and statistics.
#[derive(Debug, Clone)]
pub struct SimServer {
    port: u16,
    behavior: Arc<Mutex<ServerBehavior>>,
    stats: Arc<Mutex<ServerStats>>,
}

impl SimServer {
    /// Backend listening on `port` with [`ServerBehavior::Accept`].
    pub fn new(port: u16) -> Self {
        Self {
            port,
            behavior: Arc::new(Mutex::new(ServerBehavior::Accept)),
            stats: Arc::new(Mutex::new(ServerStats::default())),
        }
    }

    /// Change how subsequent channels are answered.
    pub fn set_behavior(&self, behavior: ServerBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> ServerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Accept connections until the host is stopped.
    pub async fn serve(self) -> Result<(), Box<dyn Error>> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        let listener = TcpListener::bind(addr).await?;

        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle(stream).await {
                    tracing::debug!(%peer, "connection ended: {}", e);
                }
            });
        }
    }

    async fn handle(&self, stream: TcpStream) -> Result<(), Box<dyn Error>> {
        let token = Arc::new(Mutex::new(String::new()));
        let callback = {
            let token = Arc::clone(&token);
            move |request: &Request, response: Response| {
                let query = request.uri().query().unwrap_or_default();
                *token.lock().unwrap_or_else(PoisonError::into_inner) = token_param(query);
                Ok::<_, ErrorResponse>(response)
            }
        };
        let mut ws = accept_hdr_async(stream, callback).await?;

        let token = token.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let connection = self.record(|stats| {
            stats.connections += 1;
            stats.accepted_at.push(turmoil::elapsed());
            stats.tokens.push(token);
            stats.connections
        });

        let behavior = self.behavior.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match behavior {
            ServerBehavior::Reject { message } => {
                send(&mut ws, ServerFrame::ConnectError(ConnectError { message })).await?;
                ws.close(None).await?;
                return Ok(());
            },
            ServerBehavior::Silent => {},
            ServerBehavior::Accept | ServerBehavior::DropAfterHandshake => {
                let session_id = Some(format!("sim-{connection}"));
                send(&mut ws, ServerFrame::Connected(Connected { session_id })).await?;
                self.record(|stats| stats.acknowledged += 1);

                if behavior == ServerBehavior::DropAfterHandshake {
                    ws.close(None).await?;
                    return Ok(());
                }
            },
        }

        while let Some(message) = ws.next().await {
            match message? {
                WsMessage::Text(text) => match ClientFrame::decode(text.as_str()) {
                    Ok(frame) => self.respond(&mut ws, frame).await?,
                    Err(e) => tracing::warn!("dropping bad client frame: {}", e),
                },
                WsMessage::Close(_) => break,
                _ => {},
            }
        }

        Ok(())
    }

    async fn respond(
        &self,
        ws: &mut WebSocketStream<TcpStream>,
        frame: ClientFrame,
    ) -> Result<(), Box<dyn Error>> {
        match frame {
            ClientFrame::SendMessage(sent) => {
                let n = self.record(|stats| {
                    stats.messages += 1;
                    stats.messages
                });
                let message = Message {
                    id: format!("m-{n}"),
                    conversation_id: sent.conversation_id,
                    sender: Sender { id: CLIENT_USER_ID, name: "client".to_string() },
                    recipient_id: Some(sent.recipient_id),
                    content: sent.content,
                    attachment: sent.attachment,
                    created_at: now(),
                    read_at: None,
                };
                let event = InboundEvent::MessageSent(MessageSent {
                    message,
                    correlation_id: Some(sent.correlation_id),
                });
                send(ws, event.into()).await
            },
            ClientFrame::MarkAsRead(read) => {
                self.record(|stats| stats.reads += 1);
                let event = InboundEvent::MessageRead(MessageRead {
                    message_id: read.message_id,
                    conversation_id: None,
                    reader_id: Some(CLIENT_USER_ID),
                    read_at: now(),
                    correlation_id: Some(read.correlation_id),
                });
                send(ws, event.into()).await
            },
            ClientFrame::JoinConversation(conversation) => {
                let id = conversation.conversation_id;
                let n = self.record(|stats| {
                    stats.joins.push(id.clone());
                    stats.joins.len()
                });
                let greeting = Message {
                    id: format!("greeting-{n}"),
                    conversation_id: id,
                    sender: Sender { id: PEER_USER_ID, name: "peer".to_string() },
                    recipient_id: Some(CLIENT_USER_ID),
                    content: "welcome".to_string(),
                    attachment: None,
                    created_at: now(),
                    read_at: None,
                };
                send(ws, InboundEvent::NewMessage(greeting).into()).await
            },
            ClientFrame::LeaveConversation(conversation) => {
                self.record(|stats| stats.leaves.push(conversation.conversation_id));
                Ok(())
            },
            ClientFrame::Typing(_) => Ok(()),
        }
    }

    fn record<T>(&self, update: impl FnOnce(&mut ServerStats) -> T) -> T {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

async fn send(
    ws: &mut WebSocketStream<TcpStream>,
    frame: ServerFrame,
) -> Result<(), Box<dyn Error>> {
    ws.send(WsMessage::text(frame.encode()?)).await?;
    Ok(())
}

/// Virtual wall clock: the epoch plus simulated time.
fn now() -> DateTime<Utc> {
    let elapsed = turmoil::elapsed();
    DateTime::from_timestamp(elapsed.as_secs().cast_signed(), elapsed.subsec_nanos())
        .unwrap_or_default()
}

fn token_param(query: &str) -> String {
    let raw = query.split('&').find_map(|pair| pair.strip_prefix("token=")).unwrap_or_default();
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
