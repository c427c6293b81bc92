//! Outbound flow control.
//!
//! Every frame a channel sends passes two gates on its way to the socket:
//!
//! ```text
//! Channel::send ──► FenceCoordinator ──► (held until ready) ──► CongestionController ──► socket
//! ```
//!
//! Both gates buffer rather than drop, and both preserve per-channel
//! order. Neither touches the transport; they hand frames back to the
//! connection's multiplexer when it is their turn.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `congestion` | Per-channel byte windows credited by `ack` |
//! | `fence` | Cross-channel ordering behind a fence channel |

// ============================================================================
// Imports
// ============================================================================

use crate::protocol::{Control, Payload};

// ============================================================================
// Submodules
// ============================================================================

/// Per-channel congestion windows.
pub mod congestion;

/// Fence ordering.
pub mod fence;

// ============================================================================
// Re-exports
// ============================================================================

pub use congestion::{CongestionController, DEFAULT_WINDOW};
pub use fence::FenceCoordinator;

// ============================================================================
// Outbound
// ============================================================================

/// One outbound item of a channel, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Channel data.
    Data(Payload),
    /// Control message addressed to the channel.
    Control(Control),
}

impl Outbound {
    /// Bytes this item charges against the congestion window.
    #[inline]
    #[must_use]
    pub fn cost(&self) -> u64 {
        match self {
            Self::Data(payload) => payload.len() as u64,
            Self::Control(_) => 0,
        }
    }

    /// Returns `true` for the channel's `open`.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Control(control) if control.is_open())
    }
}
