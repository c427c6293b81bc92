//! Bridge connection.
//!
//! A [`Connection`] owns one transport to the bridge and multiplexes any
//! number of [`Channel`](crate::Channel)s over it.
//!
//! # Connection Lifecycle
//!
//! 1. [`ConnectionBuilder::connect`] - open the transport, send `init`
//! 2. Bridge answers with its `init` - seed, host, CSRF token, capabilities
//! 3. [`Connection::open`] - channels come and go
//! 4. Transport loss or [`Connection::close`] - every channel is closed
//!    with a problem and the event loop stops
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Connection configuration |
//! | `core` | Connection handle and event loop |
//! | `mux` | Channel multiplexer (internal) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Submodules
// ============================================================================

/// Connection configuration.
pub mod builder;

/// Connection handle and event loop.
pub mod core;

/// Channel multiplexer.
pub(crate) mod mux;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionBuilder;
pub use core::Connection;
pub use mux::{InboundMessage, MessageFilter};

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Transport open, waiting for the bridge's `init`.
    Connecting,
    /// Handshake complete.
    Open,
    /// Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}
