//! # parley-transport
//!
//! Transport abstraction layer for the Parley realtime chat layer.
//!
//! - **WebSocket** - axum WebSocket upgrades, JSON or MessagePack frames
//! - **Memory** - an in-process channel pair, for tests and embedding
//!
//! ## Transport Abstraction
//!
//! Every transport implements [`Connection`], so the connection lifecycle
//! is written once against decoded events.
//!
//! ```rust,ignore
//! use parley_transport::Connection;
//!
//! async fn serve(mut conn: Box<dyn Connection>) {
//!     while let Ok(Some(event)) = conn.recv().await {
//!         // Route event
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryClient, MemoryConnection};
pub use traits::{Connection, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
