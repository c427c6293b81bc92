//! Channels.
//!
//! A [`Channel`] is one logical stream multiplexed over the connection.
//! Channels are created with [`Connection::open`](crate::Connection::open)
//! and report everything that happens to them as [`ChannelEvent`]s.
//!
//! # Lifecycle
//!
//! ```text
//! init ──► open ──► ready ──► closing ──► closed
//!   │        │        │                     ▲
//!   └────────┴────────┴─── bridge close ────┘
//! ```
//!
//! | State | Meaning |
//! |-------|---------|
//! | `init` | `open` held behind a fence, not yet on the wire |
//! | `open` | `open` transmitted, waiting for `ready` |
//! | `ready` | Bridge accepted the channel |
//! | `closing` | Local close requested, waiting for the bridge |
//! | `closed` | Terminal |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::{Map, Value};

use crate::protocol::{Control, Payload, Problem};

// ============================================================================
// Submodules
// ============================================================================

/// Channel handle.
pub mod core;

/// Open options.
pub mod options;

/// Id-to-channel bookkeeping.
pub(crate) mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::Channel;
pub use options::{ChannelOptions, FENCE_GROUP};

// ============================================================================
// ChannelState
// ============================================================================

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Created; `open` not yet transmitted.
    Init,
    /// `open` transmitted, awaiting `ready`.
    Open,
    /// Accepted by the bridge.
    Ready,
    /// Local close requested.
    Closing,
    /// Terminal.
    Closed,
}

impl ChannelState {
    /// Returns `true` once a close was requested or observed.
    #[inline]
    #[must_use]
    pub fn is_closing_or_closed(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Open => "open",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

// ============================================================================
// CloseInfo
// ============================================================================

/// Why a channel closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseInfo {
    /// Problem code; `None` on clean shutdown.
    pub problem: Option<Problem>,
    /// Human readable detail.
    pub message: Option<String>,
    /// Extra fields of the `close` message (exit status, ...).
    pub fields: Map<String, Value>,
}

impl CloseInfo {
    /// Close info carrying only a problem.
    #[inline]
    #[must_use]
    pub fn with_problem(problem: Problem) -> Self {
        Self {
            problem: Some(problem),
            ..Default::default()
        }
    }

    /// Returns `true` if the channel closed without a problem.
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.problem.is_none()
    }

    /// Extracts close info from a `close` control message.
    #[must_use]
    pub fn from_control(control: &Control) -> Option<Self> {
        match control {
            Control::Close {
                problem,
                message,
                fields,
                ..
            } => Some(Self {
                problem: problem.clone(),
                message: message.clone(),
                fields: fields.clone(),
            }),
            _ => None,
        }
    }
}

// ============================================================================
// ChannelEvent
// ============================================================================

/// Something that happened on a channel.
///
/// Events of one channel arrive in order. `Close` is always last and
/// delivered exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Control message addressed to the channel (`ready`, `done`, `close`, ...).
    Control(Control),
    /// Data received on the channel.
    Message(Payload),
    /// Channel closed.
    Close(CloseInfo),
}

impl ChannelEvent {
    /// Returns `true` for the terminal event.
    #[inline]
    #[must_use]
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }
}

// ============================================================================
// Tests
// ============================================================================
