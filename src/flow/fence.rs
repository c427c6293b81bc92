//! Fence ordering.
//!
//! Channels are unordered with respect to each other. A channel opened in
//! the `fence` group changes that: every channel opened while the fence is
//! pending is gated, and all of its outbound frames (its `open` included)
//! are held in issue order until the fence completes. Completion is the
//! bridge's `done` for the fence or the fence channel closing.
//!
//! A fence that closes with a problem releases its held frames just like a
//! clean completion. There is no way to keep them blocked forever.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;

use super::Outbound;

// ============================================================================
// FenceCoordinator
// ============================================================================

/// Holds traffic of channels opened after a pending fence.
#[derive(Debug, Default)]
pub struct FenceCoordinator {
    fence: Option<ChannelId>,
    gated: FxHashSet<ChannelId>,
    held: VecDeque<(ChannelId, Outbound)>,
}

impl FenceCoordinator {
    /// Creates an idle coordinator.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pending fence, if any.
    #[inline]
    #[must_use]
    pub fn active(&self) -> Option<&ChannelId> {
        self.fence.as_ref()
    }

    /// Starts a fence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FenceActive`] if another fence is still pending.
    pub fn begin(&mut self, channel: &ChannelId) -> Result<()> {
        if let Some(fence) = &self.fence {
            return Err(Error::fence_active(fence.clone()));
        }
        debug!(channel = %channel, "Fence started");
        self.fence = Some(channel.clone());
        Ok(())
    }

    /// Registers a newly opened channel, gating it if a fence is pending.
    pub fn admit(&mut self, channel: &ChannelId) {
        if self.fence.is_some() {
            trace!(channel = %channel, "Channel gated behind fence");
            self.gated.insert(channel.clone());
        }
    }

    /// Returns `true` if the channel's traffic must be held.
    #[inline]
    #[must_use]
    pub fn is_gated(&self, channel: &ChannelId) -> bool {
        self.gated.contains(channel)
    }

    /// Holds an item of a gated channel.
    pub fn hold(&mut self, channel: ChannelId, item: Outbound) {
        self.held.push_back((channel, item));
    }

    /// Number of held items.
    #[inline]
    #[must_use]
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Completes the fence if `channel` is the pending fence.
    ///
    /// Returns the held items in issue order, or `None` if `channel` is not
    /// the fence.
    pub fn complete(&mut self, channel: &ChannelId) -> Option<Vec<(ChannelId, Outbound)>> {
        if self.fence.as_ref() != Some(channel) {
            return None;
        }

        self.fence = None;
        self.gated.clear();
        let released: Vec<_> = self.held.drain(..).collect();
        debug!(
            channel = %channel,
            released = released.len(),
            "Fence completed"
        );
        Some(released)
    }

    /// Drops all state without releasing anything.
    pub fn clear(&mut self) {
        self.fence = None;
        self.gated.clear();
        self.held.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::Payload;

    fn data(text: &str) -> Outbound {
        Outbound::Data(Payload::from(text))
    }

    #[test]
    fn test_idle_coordinator_gates_nothing() {
        let mut fc = FenceCoordinator::new();
        let id = ChannelId::from("1");
        fc.admit(&id);
        assert!(!fc.is_gated(&id));
        assert!(fc.active().is_none());
    }

    #[test]
    fn test_channels_after_fence_are_gated() {
        let mut fc = FenceCoordinator::new();
        let before = ChannelId::from("1");
        let fence = ChannelId::from("2");
        let after = ChannelId::from("3");

        fc.admit(&before);
        fc.begin(&fence).expect("begin");
        fc.admit(&after);

        assert!(!fc.is_gated(&before));
        assert!(!fc.is_gated(&fence));
        assert!(fc.is_gated(&after));
    }

    #[test]
    fn test_release_in_issue_order() {
        let mut fc = FenceCoordinator::new();
        let fence = ChannelId::from("a");
        let b = ChannelId::from("b");
        let c = ChannelId::from("c");

        fc.begin(&fence).expect("begin");
        fc.admit(&b);
        fc.admit(&c);
        fc.hold(b.clone(), data("b1"));
        fc.hold(c.clone(), data("c1"));
        fc.hold(b.clone(), data("b2"));

        assert!(fc.complete(&b).is_none(), "only the fence completes");

        let released = fc.complete(&fence).expect("release");
        assert_eq!(
            released,
            vec![(b.clone(), data("b1")), (c, data("c1")), (b.clone(), data("b2"))]
        );
        assert!(!fc.is_gated(&b));
        assert_eq!(fc.held(), 0);
    }

    #[test]
    fn test_second_fence_rejected() {
        let mut fc = FenceCoordinator::new();
        let first = ChannelId::from("1");
        fc.begin(&first).expect("begin");

        let err = fc.begin(&ChannelId::from("2")).unwrap_err();
        assert!(matches!(err, Error::FenceActive { fence } if fence == first));

        let _ = fc.complete(&first);
        assert!(fc.begin(&ChannelId::from("3")).is_ok());
    }
}
