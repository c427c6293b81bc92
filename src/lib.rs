//! Cockpit bridge transport - multiplexed channels over one socket.
//!
//! This library is a client for the Cockpit bridge protocol: one
//! WebSocket (or a relay through a parent frame) carries any number of
//! independent channels, each talking to a bridge-side payload such as a
//! TCP stream, a spawned process or a D-Bus client.
//!
//! # Architecture
//!
//! ```text
//! Channel ─┐
//! Channel ─┼─► Multiplexer ─► event loop ─► Transport ─► bridge
//! Channel ─┘      │  ▲
//!                 │  └── fence / congestion gates
//!                 └───► nested frames (RelayTransport)
//! ```
//!
//! Key design principles:
//!
//! - Each [`Connection`] owns one transport and one event loop task
//! - Messages are `"<channel>\n<payload>"`; the empty channel carries JSON control
//! - Per-channel ordering is preserved; channels are unordered unless fenced
//! - Bridge-side failures arrive as `close` events, never as panics
//!
//! # Quick Start
//!
//! ```no_run
//! use cockpit_transport::{ChannelEvent, ChannelOptions, Connection, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::builder()
//!         .url("ws://localhost:9090/cockpit/socket")
//!         .connect()
//!         .await?;
//!
//!     let mut channel = connection.open(ChannelOptions::echo())?;
//!     channel.send("hello")?;
//!     channel.done()?;
//!
//!     while let Some(event) = channel.recv().await {
//!         if let ChannelEvent::Message(payload) = event {
//!             println!("{payload:?}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channel`] | [`Channel`] handle, events and open options |
//! | [`connection`] | [`Connection`] and its builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`flow`] | Fence and congestion gates |
//! | [`identifiers`] | Channel ids and their allocator |
//! | [`protocol`] | Wire codec and control messages |
//! | [`transport`] | WebSocket and relay transports |

// ============================================================================
// Modules
// ============================================================================

/// Channels: handle, lifecycle events and open options.
pub mod channel;

/// Bridge connection and its builder.
///
/// Use [`Connection::builder()`] to configure and connect.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Outbound flow control.
pub mod flow;

/// Channel identifiers.
pub mod identifiers;

/// Wire protocol: framing and control messages.
pub mod protocol;

/// Message transports.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channel::{Channel, ChannelEvent, ChannelOptions, ChannelState, CloseInfo};

// Connection types
pub use connection::{Connection, ConnectionBuilder, ConnectionState, InboundMessage, MessageFilter};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ChannelId;

// Protocol types
pub use protocol::{Control, Init, Payload, Problem};

// Transport types
pub use transport::{RelayMessage, RelayTransport, Transport, WebSocketTransport};
