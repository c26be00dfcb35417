//! Handles to live connections.
//!
//! The transport task owns the socket. Everyone else holds a
//! [`ConnectionHandle`]: a bounded outbound queue that the transport task
//! drains in order, plus a close signal either side can fire.

use crate::identity::{ConnectionId, UserIdentity};
use chrono::{DateTime, Utc};
use parley_protocol::OutboundEvent;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default outbound queue capacity per connection.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Failure to hand an event to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection is closed or closing.
    #[error("Connection closed")]
    Closed,

    /// The connection's outbound queue is full.
    #[error("Outbound queue full")]
    Full,
}

impl DeliveryError {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryError::Closed => "closed",
            DeliveryError::Full => "full",
        }
    }
}

/// A cloneable reference to one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Arc<OutboundEvent>>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    #[must_use]
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Arc<OutboundEvent>>) {
        Self::with_close_token(id, capacity, CancellationToken::new())
    }

    /// Create a handle whose close signal is the given token.
    ///
    /// Passing a child of a server-wide token closes the connection on
    /// shutdown.
    #[must_use]
    pub fn with_close_token(
        id: ConnectionId,
        capacity: usize,
        closed: CancellationToken,
    ) -> (Self, mpsc::Receiver<Arc<OutboundEvent>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { id, sender, closed }, receiver)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue an event for this connection without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or its queue is full.
    pub fn deliver(&self, event: Arc<OutboundEvent>) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => {
                self.closed.cancel();
                DeliveryError::Closed
            }
        })
    }

    /// Check if the connection is still live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.closed.is_cancelled() && !self.sender.is_closed()
    }

    /// Signal the connection to close.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Wait until the connection is signalled to close.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

/// A registered connection: who it belongs to and since when.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub identity: UserIdentity,
    pub handle: ConnectionHandle,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(identity: UserIdentity, handle: ConnectionHandle) -> Self {
        Self {
            identity,
            handle,
            connected_at: Utc::now(),
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        self.handle.id()
    }
}
