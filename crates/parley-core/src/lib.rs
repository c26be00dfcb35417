//! # parley-core
//!
//! Connection registry, presence broadcasting and event routing for the
//! Parley realtime chat layer.
//!
//! This crate provides the building blocks shared by every transport:
//!
//! - **Registry** - Which users are reachable, and on which connections
//! - **Presence** - Publish the online-user set whenever membership changes
//! - **Router** - Fan chat and typing events out to live connections
//! - **Auth** - Handshake credential extraction and the verifier seam
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Lifecycle  │────▶│  Registry   │◀────│   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │ changes
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Presence   │
//!                     └─────────────┘
//! ```
//!
//! The registry never talks to connections itself. The presence
//! broadcaster subscribes to its change notifications, and the router
//! writes to the handles the registry resolves.

pub mod auth;
pub mod connection;
pub mod identity;
pub mod message;
pub mod presence;
pub mod registry;
pub mod router;

pub use auth::{
    extract_credential, Credential, CredentialSource, Handshake, IdentityVerifier,
    VerificationError,
};
pub use connection::{ConnectionHandle, ConnectionRecord, DeliveryError};
pub use identity::{ConnectionId, UserIdentity};
pub use message::{ChatEvent, MessageBody, TypingEvent};
pub use presence::{PresenceBroadcaster, PresenceConfig};
pub use registry::{Registry, RegistryStats};
pub use router::{DeliveryReport, EventRouter};
