//! Transport abstraction traits for Parley.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the connection lifecycle to be transport-agnostic.

use async_trait::async_trait;
use parley_core::Handshake;
use parley_protocol::{InboundEvent, OutboundEvent, ProtocolError};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Whether the connection is still usable after this error.
    ///
    /// A single bad frame is skipped; anything else ends the connection.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// An active connection over a transport.
///
/// Connections carry decoded events between the server and a single
/// client.
#[async_trait]
pub trait Connection: Send {
    /// What the client presented when connecting.
    fn handshake(&self) -> &Handshake;

    /// Receive the next event from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly. Must be cancel
    /// safe: dropping the future loses no event.
    async fn recv(&mut self) -> Result<Option<InboundEvent>, TransportError>;

    /// Send an event to the connection.
    async fn send(&mut self, event: &OutboundEvent) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
