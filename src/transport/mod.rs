//! Transport layer.
//!
//! A transport moves whole [`WireMessage`]s between the client and the
//! bridge. It knows nothing about channels; the connection's event loop
//! owns both halves once the transport is split.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                           ┌──────────────────┐
//! │  Connection      │        WebSocket          │  Bridge          │
//! │  (event loop)    │◄─────────────────────────►│  (cockpit1)      │
//! │                  │                           │                  │
//! │  attach_frame ───┼──► RelayTransport ──► nested Connection      │
//! └──────────────────┘                           └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | WebSocket transport (`cockpit1` subprotocol) |
//! | `relay` | Envelope transport for nested frames |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::WireMessage;

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket transport.
pub mod websocket;

/// Relay transport for nested frames.
pub mod relay;

// ============================================================================
// Re-exports
// ============================================================================

pub use relay::{RelayMessage, RelayTransport};
pub use websocket::{SUBPROTOCOL, WebSocketTransport};

// ============================================================================
// Traits
// ============================================================================

/// Write half of a transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Sends one message.
    async fn send(&mut self, message: WireMessage) -> Result<()>;

    /// Closes the transport. Further sends fail.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a transport.
#[async_trait]
pub trait TransportStream: Send {
    /// Receives the next message, or `None` once the peer is gone.
    async fn recv(&mut self) -> Option<Result<WireMessage>>;
}

/// A bidirectional message transport.
pub trait Transport: Send + 'static {
    /// Returns `true` if binary messages can be sent natively.
    ///
    /// Text-only transports carry binary channel payloads as base64.
    fn supports_binary(&self) -> bool;

    /// Origin this end identifies itself with, if known.
    fn origin(&self) -> Option<String>;

    /// Splits the transport into its write and read halves.
    fn split(self: Box<Self>) -> (Box<dyn TransportSink>, Box<dyn TransportStream>);
}
