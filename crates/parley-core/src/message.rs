//! Chat and typing events routed between users.

use crate::identity::UserIdentity;
use chrono::{DateTime, SecondsFormat, Utc};
use parley_protocol::{MessagePayload, OutboundEvent};

/// Persisted message identifier.
pub type MessageId = String;

/// Content of a chat message: text, an image reference, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBody {
    pub text: Option<String>,
    pub image: Option<String>,
}

impl MessageBody {
    /// Create a text-only body.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    /// Check if the body carries neither text nor an image.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let blank = |s: &Option<String>| s.as_deref().map_or(true, |v| v.trim().is_empty());
        blank(&self.text) && blank(&self.image)
    }
}

/// A chat message that has already been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub id: MessageId,
    pub sender: UserIdentity,
    pub receiver: UserIdentity,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatEvent {
    /// Wire form of the message.
    #[must_use]
    pub fn to_payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id.clone(),
            sender_id: self.sender.to_string(),
            receiver_id: self.receiver.to_string(),
            text: self.body.text.clone(),
            image: self.body.image.clone(),
            created_at: format_timestamp(&self.created_at),
            updated_at: format_timestamp(&self.updated_at),
        }
    }

    /// Check whether `identity` is one of the two participants.
    #[must_use]
    pub fn involves(&self, identity: &UserIdentity) -> bool {
        &self.sender == identity || &self.receiver == identity
    }
}

/// A typing indicator. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    pub sender: UserIdentity,
    pub receiver: UserIdentity,
    pub is_typing: bool,
}

impl TypingEvent {
    #[must_use]
    pub fn new(sender: UserIdentity, receiver: UserIdentity, is_typing: bool) -> Self {
        Self {
            sender,
            receiver,
            is_typing,
        }
    }

    /// Wire form of the indicator, as seen by the receiver.
    #[must_use]
    pub fn to_outbound(&self) -> OutboundEvent {
        OutboundEvent::user_typing(self.sender.as_str(), self.is_typing)
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-24T12:00:00.000Z`.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_body_is_empty() {
        assert!(MessageBody::default().is_empty());
        assert!(MessageBody::text("   ").is_empty());
        assert!(!MessageBody::text("hi").is_empty());

        let image_only = MessageBody {
            text: None,
            image: Some("https://img.example/1.png".into()),
        };
        assert!(!image_only.is_empty());
    }

    #[test]
    fn test_payload_timestamps() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 24, 12, 0, 0).unwrap();
        let event = ChatEvent {
            id: "m1".into(),
            sender: "u1".into(),
            receiver: "u2".into(),
            body: MessageBody::text("hi"),
            created_at: ts,
            updated_at: ts,
        };

        let payload = event.to_payload();
        assert_eq!(payload.created_at, "2024-05-24T12:00:00.000Z");
        assert_eq!(payload.sender_id, "u1");
        assert_eq!(payload.receiver_id, "u2");
        assert!(event.involves(&"u2".into()));
        assert!(!event.involves(&"u3".into()));
    }
}
