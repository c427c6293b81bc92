//! Error types for the bridge transport.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use cockpit_transport::{ChannelOptions, Connection, Result};
//!
//! async fn example(connection: &Connection) -> Result<()> {
//!     let mut channel = connection.open(ChannelOptions::echo())?;
//!     channel.wait_ready().await?;
//!     channel.send("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::Framing`] |
//! | Channel | [`Error::InvalidArgument`], [`Error::InvalidState`], [`Error::FenceActive`], [`Error::ChannelFailed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |
//!
//! Failures that happen on the bridge side after a channel was opened are
//! not returned from calls. They arrive as a `Close` event on the channel.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::channel::ChannelState;
use crate::identifiers::ChannelId;
use crate::protocol::Problem;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when connection configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport connection failed.
    ///
    /// Returned when the server answers the upgrade request with
    /// anything but `101 Switching Protocols`.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timeout waiting for the bridge handshake.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed.
    ///
    /// Returned when an operation needs a live connection.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation.
    ///
    /// Returned when the handshake is violated or a control message
    /// is structurally invalid.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Malformed wire frame.
    ///
    /// Returned by the codec when a frame has no channel separator
    /// or an unreadable channel id.
    #[error("Framing error: {message}")]
    Framing {
        /// Description of the framing problem.
        message: String,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// Invalid argument supplied by the caller.
    ///
    /// Sending text on a binary channel (or bytes on a text channel)
    /// is reported here.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Operation not allowed in the channel's current state.
    #[error("Channel {channel} is {state}")]
    InvalidState {
        /// The channel the operation targeted.
        channel: ChannelId,
        /// State the channel was in.
        state: ChannelState,
    },

    /// A fence channel is already pending on this connection.
    #[error("Fence {fence} is still pending")]
    FenceActive {
        /// The pending fence channel.
        fence: ChannelId,
    },

    /// Channel closed by the bridge with a problem.
    #[error("Channel {channel} failed: {problem}{}", detail(.message))]
    ChannelFailed {
        /// The failed channel.
        channel: ChannelId,
        /// Problem code reported by the bridge.
        problem: Problem,
        /// Optional human readable message.
        message: Option<String>,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

/// Formats an optional bridge message as a parenthesized suffix.
fn detail(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(" ({m})"))
        .unwrap_or_default()
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a framing error.
    #[inline]
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(channel: ChannelId, state: ChannelState) -> Self {
        Self::InvalidState { channel, state }
    }

    /// Creates a fence active error.
    #[inline]
    pub fn fence_active(fence: ChannelId) -> Self {
        Self::FenceActive { fence }
    }

    /// Creates a channel failure error.
    #[inline]
    pub fn channel_failed(channel: ChannelId, problem: Problem, message: Option<String>) -> Self {
        Self::ChannelFailed {
            channel,
            problem,
            message,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Io(_)
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is scoped to a single channel.
    #[inline]
    #[must_use]
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::InvalidState { .. }
                | Self::FenceActive { .. }
                | Self::ChannelFailed { .. }
        )
    }

    /// Returns the bridge problem code, if this error carries one.
    #[inline]
    #[must_use]
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Self::ChannelFailed { problem, .. } => Some(problem),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_channel_failed_display() {
        let err = Error::channel_failed(ChannelId::from("4:1"), Problem::NotFound, None);
        assert_eq!(err.to_string(), "Channel 4:1 failed: not-found");

        let err = Error::channel_failed(
            ChannelId::from("4:2"),
            Problem::AccessDenied,
            Some("not permitted".into()),
        );
        assert_eq!(
            err.to_string(),
            "Channel 4:2 failed: access-denied (not permitted)"
        );
    }

    #[test]
    fn test_invalid_state_display() {
        let err = Error::invalid_state(ChannelId::from("7"), ChannelState::Closing);
        assert_eq!(err.to_string(), "Channel 7 is closing");
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("x").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::connection_timeout(10).is_connection_error());
        assert!(!Error::config("x").is_connection_error());
    }

    #[test]
    fn test_is_channel_error() {
        assert!(Error::fence_active(ChannelId::from("1")).is_channel_error());
        assert!(Error::invalid_argument("x").is_channel_error());
        assert!(!Error::protocol("x").is_channel_error());
    }

    #[test]
    fn test_problem_accessor() {
        let err = Error::channel_failed(ChannelId::from("1"), Problem::Terminated, None);
        assert_eq!(err.problem(), Some(&Problem::Terminated));
        assert!(Error::ConnectionClosed.problem().is_none());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
