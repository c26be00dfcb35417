//! WebSocket transport implementation.
//!
//! This module adapts an upgraded axum [`WebSocket`] to the [`Connection`] trait.

use crate::traits::{Connection, TransportError};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::http::HeaderMap;
use bytes::Bytes;
use parley_core::Handshake;
use parley_protocol::{EventCodec, InboundEvent, OutboundEvent, ProtocolError, WireFrame};
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Close code sent when the server ends a connection normally.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// Build a handshake from upgrade request headers and the auth payload token.
///
/// Headers that are not valid UTF-8 are skipped.
#[must_use]
pub fn handshake_from_headers(headers: &HeaderMap, auth_token: Option<String>) -> Handshake {
    let mut handshake = Handshake::new();
    handshake.auth_token = auth_token;
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            handshake.insert_header(name.as_str(), value);
        }
    }
    handshake
}

/// A WebSocket connection.
pub struct WebSocketConnection {
    socket: WebSocket,
    handshake: Handshake,
    codec: EventCodec,
    remote_addr: Option<SocketAddr>,
    is_open: bool,
    config: WebSocketConfig,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(
        socket: WebSocket,
        handshake: Handshake,
        codec: EventCodec,
        remote_addr: Option<SocketAddr>,
        config: WebSocketConfig,
    ) -> Self {
        Self {
            socket,
            handshake,
            codec,
            remote_addr,
            is_open: true,
            config,
        }
    }

    fn decode(&self, frame: WireFrame) -> Result<Option<InboundEvent>, TransportError> {
        if frame.len() > self.config.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                frame.len(),
                self.config.max_message_size
            );
            return Err(ProtocolError::FrameTooLarge(frame.len()).into());
        }
        Ok(Some(self.codec.decode(&frame)?))
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    async fn recv(&mut self) -> Result<Option<InboundEvent>, TransportError> {
        if !self.is_open {
            return Ok(None);
        }

        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return self.decode(WireFrame::Text(text)),
                Some(Ok(Message::Binary(data))) => {
                    return self.decode(WireFrame::Binary(Bytes::from(data)))
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are queued by the WebSocket layer itself
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, event: &OutboundEvent) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match self.codec.encode(event)? {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(data) => Message::Binary(data.to_vec()),
        };
        self.socket.send(message).await.map_err(|e| {
            self.is_open = false;
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(()); // Already closed
        }

        self.socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_NORMAL,
                reason: "".into(),
            })))
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use parley_core::{extract_credential, CredentialSource};

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[test]
    fn test_handshake_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("jwt=from-cookie"));
        headers.insert("authorization", HeaderValue::from_static("Bearer from-header"));

        let handshake = handshake_from_headers(&headers, None);
        let credential = extract_credential(&handshake).unwrap();
        assert_eq!(credential.token, "from-header");
        assert_eq!(credential.source, CredentialSource::AuthorizationHeader);

        let handshake = handshake_from_headers(&headers, Some("from-payload".into()));
        assert_eq!(extract_credential(&handshake).unwrap().token, "from-payload");
    }

    #[test]
    fn test_repeated_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.append("cookie", HeaderValue::from_static("jwt=tok"));
        headers.append("cookie", HeaderValue::from_static("theme=dark"));

        let credential = extract_credential(&handshake_from_headers(&headers, None)).unwrap();
        assert_eq!(credential.token, "tok");
        assert_eq!(credential.source, CredentialSource::Cookie);
    }
}
