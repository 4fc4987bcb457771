//! WebSocket transport over turmoil's simulated TCP.

use async_trait::async_trait;
use chatwire_client::{
    ChannelLink, OpenRequest, Transport, TransportError, transport::websocket::spawn_link,
};
use turmoil::net::TcpStream;

/// Transport that opens real WebSocket channels across the simulated network.
///
/// The host and port are taken from the request URL, so a client configured
/// with `ws://server:3000` dials the turmoil host named `server`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTransport;

impl SimTransport {
    /// Create a simulated transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn open(&self, request: OpenRequest) -> Result<ChannelLink, TransportError> {
        let authority = authority(&request.url).ok_or_else(|| TransportError::Connect {
            reason: format!("bad url: {}", request.url),
        })?;

        let stream = TcpStream::connect(authority)
            .await
            .map_err(|e| TransportError::Connect { reason: e.to_string() })?;

        let (ws, _response) = tokio_tungstenite::client_async(request.url.as_str(), stream)
            .await
            .map_err(|e| TransportError::Connect { reason: e.to_string() })?;

        Ok(spawn_link(request.channel, ws))
    }
}

/// `host:port` part of a `ws://` URL.
fn authority(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("ws://").or_else(|| url.strip_prefix("wss://"))?;
    let end = rest.find(['/', '?']).unwrap_or(rest.len());
    let authority = &rest[..end];
    (!authority.is_empty()).then_some(authority)
}
