//! Event types for the Parley protocol.
//!
//! Inbound and outbound events are separate enums so that a server can
//! match exhaustively on what a client may send, and a client on what
//! the server may push.

use serde::{Deserialize, Serialize};

/// Event kind identifiers, as they appear in the `event` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SendMessage,
    Typing,
    StopTyping,
    Connected,
    OnlineUsers,
    NewMessage,
    UserTyping,
    Error,
}

impl EventKind {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SendMessage => "sendMessage",
            EventKind::Typing => "typing",
            EventKind::StopTyping => "stopTyping",
            EventKind::Connected => "connected",
            EventKind::OnlineUsers => "onlineUsers",
            EventKind::NewMessage => "newMessage",
            EventKind::UserTyping => "userTyping",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    /// Send a chat message to another user.
    #[serde(rename = "sendMessage")]
    SendMessage(SendMessage),

    /// The client started typing to another user.
    #[serde(rename = "typing")]
    Typing(TypingTarget),

    /// The client stopped typing to another user.
    #[serde(rename = "stopTyping")]
    StopTyping(TypingTarget),
}

impl InboundEvent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::SendMessage(_) => EventKind::SendMessage,
            InboundEvent::Typing(_) => EventKind::Typing,
            InboundEvent::StopTyping(_) => EventKind::StopTyping,
        }
    }
}

/// Payload of `sendMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Target user.
    pub receiver_id: String,
    /// Message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Reference to an already uploaded image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Payload of `typing` and `stopTyping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingTarget {
    /// User being typed to. Older clients send `recipientId`.
    #[serde(alias = "recipientId")]
    pub receiver_id: String,
}

/// An event pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    /// Sent once after a connection is authenticated and registered.
    #[serde(rename = "connected")]
    Connected(Connected),

    /// Current set of online users, sent on every presence change.
    #[serde(rename = "onlineUsers")]
    OnlineUsers(Vec<String>),

    /// A persisted chat message.
    #[serde(rename = "newMessage")]
    NewMessage(MessagePayload),

    /// Typing indicator from another user.
    #[serde(rename = "userTyping")]
    UserTyping(UserTyping),

    /// An inbound event was rejected.
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl OutboundEvent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            OutboundEvent::Connected(_) => EventKind::Connected,
            OutboundEvent::OnlineUsers(_) => EventKind::OnlineUsers,
            OutboundEvent::NewMessage(_) => EventKind::NewMessage,
            OutboundEvent::UserTyping(_) => EventKind::UserTyping,
            OutboundEvent::Error(_) => EventKind::Error,
        }
    }

    /// Create a `connected` event.
    #[must_use]
    pub fn connected(user_id: impl Into<String>) -> Self {
        OutboundEvent::Connected(Connected {
            status: Connected::SUCCESS.to_string(),
            user_id: user_id.into(),
        })
    }

    /// Create an `onlineUsers` event.
    #[must_use]
    pub fn online_users(user_ids: Vec<String>) -> Self {
        OutboundEvent::OnlineUsers(user_ids)
    }

    /// Create a `userTyping` event.
    #[must_use]
    pub fn user_typing(sender_id: impl Into<String>, is_typing: bool) -> Self {
        OutboundEvent::UserTyping(UserTyping {
            sender_id: sender_id.into(),
            is_typing,
        })
    }

    /// Create an `error` event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        OutboundEvent::Error(ErrorPayload {
            code,
            message: message.into(),
        })
    }
}

/// Payload of `connected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    /// Always `"success"`.
    pub status: String,
    /// Identity the connection was authenticated as.
    pub user_id: String,
}

impl Connected {
    pub const SUCCESS: &'static str = "success";
}

/// A chat message as seen by clients.
///
/// Identifiers are strings and timestamps are ISO-8601 in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Payload of `userTyping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    pub sender_id: String,
    pub is_typing: bool,
}

/// Payload of `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// HTTP-style status code.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_wire_names() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "sendMessage",
            "data": {"receiverId": "u2", "text": "hi"}
        }))
        .unwrap();

        assert_eq!(event.kind(), EventKind::SendMessage);
        match event {
            InboundEvent::SendMessage(msg) => {
                assert_eq!(msg.receiver_id, "u2");
                assert_eq!(msg.text.as_deref(), Some("hi"));
                assert!(msg.image.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_typing_accepts_recipient_alias() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "stopTyping",
            "data": {"recipientId": "u2"}
        }))
        .unwrap();

        assert_eq!(
            event,
            InboundEvent::StopTyping(TypingTarget {
                receiver_id: "u2".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result: Result<InboundEvent, _> =
            serde_json::from_value(json!({"event": "subscribe", "data": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_outbound_shapes() {
        let connected = serde_json::to_value(OutboundEvent::connected("u1")).unwrap();
        assert_eq!(
            connected,
            json!({"event": "connected", "data": {"status": "success", "userId": "u1"}})
        );

        let typing = serde_json::to_value(OutboundEvent::user_typing("u1", true)).unwrap();
        assert_eq!(
            typing,
            json!({"event": "userTyping", "data": {"senderId": "u1", "isTyping": true}})
        );

        let online =
            serde_json::to_value(OutboundEvent::online_users(vec!["u1".into(), "u2".into()]))
                .unwrap();
        assert_eq!(online, json!({"event": "onlineUsers", "data": ["u1", "u2"]}));
    }

    #[test]
    fn test_message_payload_field_names() {
        let payload = MessagePayload {
            id: "m1".into(),
            sender_id: "u1".into(),
            receiver_id: "u2".into(),
            text: Some("hi".into()),
            image: None,
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: "2024-01-01T00:00:00.000Z".into(),
        };

        let value = serde_json::to_value(OutboundEvent::NewMessage(payload)).unwrap();
        assert_eq!(value["event"], "newMessage");
        assert_eq!(value["data"]["_id"], "m1");
        assert_eq!(value["data"]["senderId"], "u1");
        assert_eq!(value["data"]["createdAt"], "2024-01-01T00:00:00.000Z");
        assert!(value["data"].get("image").is_none());
    }
}
