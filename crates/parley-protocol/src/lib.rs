//! # parley-protocol
//!
//! Wire events for the Parley realtime chat layer.
//!
//! Every frame exchanged with a client is one event, encoded as an
//! adjacently tagged object:
//!
//! ```json
//! {"event": "newMessage", "data": {"_id": "...", "senderId": "u1", "text": "hi"}}
//! ```
//!
//! ## Events
//!
//! - Inbound: `sendMessage`, `typing`, `stopTyping`
//! - Outbound: `connected`, `onlineUsers`, `newMessage`, `userTyping`, `error`
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Encoding, OutboundEvent};
//!
//! let event = OutboundEvent::online_users(vec!["u1".to_string()]);
//!
//! let frame = codec::encode(&event, Encoding::Json).unwrap();
//! let decoded: OutboundEvent = codec::decode(&frame).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, Encoding, EventCodec, ProtocolError, WireFrame};
pub use events::{
    Connected, ErrorPayload, EventKind, InboundEvent, MessagePayload, OutboundEvent, SendMessage,
    TypingTarget, UserTyping,
};
