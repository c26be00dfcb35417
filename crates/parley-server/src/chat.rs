//! Sending chat messages.
//!
//! A message is validated, persisted, and only then routed to live
//! connections. Both the realtime `sendMessage` event and the HTTP send
//! endpoint go through [`ChatService::send`].

use crate::metrics;
use crate::store::{MessageStore, StoreError, UserDirectory};
use parley_core::{ChatEvent, DeliveryReport, EventRouter, MessageBody, UserIdentity};
use parley_protocol::EventKind;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Why a message was not sent.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message text or image is required")]
    EmptyMessage,

    #[error("You cannot send a message to yourself")]
    SelfMessage,

    #[error("Receiver not found")]
    ReceiverNotFound,

    #[error("Internal server error")]
    Store(#[from] StoreError),
}

impl ChatError {
    /// HTTP-style status code for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            ChatError::EmptyMessage | ChatError::SelfMessage => 400,
            ChatError::ReceiverNotFound => 404,
            ChatError::Store(_) => 500,
        }
    }
}

/// Validates, stores and routes chat messages.
pub struct ChatService {
    users: Arc<dyn UserDirectory>,
    messages: Arc<dyn MessageStore>,
    router: Arc<EventRouter>,
}

impl ChatService {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserDirectory>,
        messages: Arc<dyn MessageStore>,
        router: Arc<EventRouter>,
    ) -> Self {
        Self {
            users,
            messages,
            router,
        }
    }

    /// Send a message from `sender` to `receiver`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is empty, the message is addressed to
    /// the sender, the receiver does not exist, or storage fails. Nothing
    /// is stored or delivered in any of these cases.
    pub async fn send(
        &self,
        sender: &UserIdentity,
        receiver: &UserIdentity,
        body: MessageBody,
    ) -> Result<(ChatEvent, DeliveryReport), ChatError> {
        if body.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if sender == receiver {
            return Err(ChatError::SelfMessage);
        }
        if self.users.find_user(receiver).await?.is_none() {
            return Err(ChatError::ReceiverNotFound);
        }

        let message = self
            .messages
            .persist(sender, receiver, body)
            .await
            .map_err(|e| {
                error!(sender = %sender, receiver = %receiver, error = %e, "Failed to store message");
                metrics::record_error("store");
                e
            })?;
        metrics::record_persisted();

        let report = self.router.deliver_message(&message);
        metrics::record_delivery(
            EventKind::NewMessage.as_str(),
            report.delivered,
            report.failed,
        );
        debug!(message = %message.id, delivered = report.delivered, "Message sent");

        Ok((message, report))
    }
}
