//! In-memory transport.
//!
//! A connection and its client joined by channels. Frames are still
//! encoded and decoded, so behavior matches a real socket up to the
//! network.

use crate::traits::{Connection, TransportError};
use async_trait::async_trait;
use parley_core::Handshake;
use parley_protocol::{EventCodec, InboundEvent, OutboundEvent, WireFrame};
use tokio::sync::mpsc;
use tracing::debug;

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    handshake: Handshake,
    codec: EventCodec,
    inbound: mpsc::UnboundedReceiver<WireFrame>,
    outbound: Option<mpsc::UnboundedSender<WireFrame>>,
}

/// Client side of an in-memory connection.
pub struct MemoryClient {
    codec: EventCodec,
    inbound: Option<mpsc::UnboundedSender<WireFrame>>,
    outbound: mpsc::UnboundedReceiver<WireFrame>,
}

impl MemoryConnection {
    /// Create a connected pair with the given handshake.
    #[must_use]
    pub fn pair(handshake: Handshake) -> (MemoryConnection, MemoryClient) {
        Self::pair_with_codec(handshake, EventCodec::default())
    }

    /// Create a connected pair using a specific encoding.
    #[must_use]
    pub fn pair_with_codec(
        handshake: Handshake,
        codec: EventCodec,
    ) -> (MemoryConnection, MemoryClient) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let connection = MemoryConnection {
            handshake,
            codec,
            inbound: inbound_rx,
            outbound: Some(outbound_tx),
        };
        let client = MemoryClient {
            codec,
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        };
        (connection, client)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    async fn recv(&mut self) -> Result<Option<InboundEvent>, TransportError> {
        if self.outbound.is_none() {
            return Ok(None);
        }
        match self.inbound.recv().await {
            Some(frame) => Ok(Some(self.codec.decode(&frame)?)),
            None => {
                debug!("Memory client disconnected");
                self.outbound = None;
                Ok(None)
            }
        }
    }

    async fn send(&mut self, event: &OutboundEvent) -> Result<(), TransportError> {
        let frame = self.codec.encode(event)?;
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        self.inbound.close();
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn is_open(&self) -> bool {
        self.outbound.is_some()
    }
}

impl MemoryClient {
    /// Send an event to the server.
    ///
    /// Returns `false` if the connection is closed.
    pub fn send(&self, event: &InboundEvent) -> bool {
        match self.codec.encode(event) {
            Ok(frame) => self.send_frame(frame),
            Err(_) => false,
        }
    }

    /// Send a raw frame to the server.
    pub fn send_frame(&self, frame: WireFrame) -> bool {
        self.inbound
            .as_ref()
            .map_or(false, |tx| tx.send(frame).is_ok())
    }

    /// Receive the next event from the server.
    ///
    /// Returns `None` once the server closed the connection and every
    /// queued event was read.
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        loop {
            let frame = self.outbound.recv().await?;
            if let Ok(event) = self.codec.decode(&frame) {
                return Some(event);
            }
        }
    }

    /// Receive an event if one is already queued.
    pub fn try_recv(&mut self) -> Option<OutboundEvent> {
        while let Ok(frame) = self.outbound.try_recv() {
            if let Ok(event) = self.codec.decode(&frame) {
                return Some(event);
            }
        }
        None
    }

    /// Close the client side of the connection.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }
}
