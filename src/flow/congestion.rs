//! Per-channel congestion windows.
//!
//! Each channel may have at most `window` payload bytes in flight. A send
//! that would exceed the window is queued; `ack` messages from the bridge
//! credit the window and release the queue in order. A payload larger
//! than the whole window is still sent once nothing else is in flight.
//!
//! Accounting is in raw payload bytes, before any base64 encoding.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::identifiers::ChannelId;

use super::Outbound;

// ============================================================================
// Constants
// ============================================================================

/// Default window per channel (2 MiB).
pub const DEFAULT_WINDOW: u64 = 2 * 1024 * 1024;

// ============================================================================
// ChannelWindow
// ============================================================================

#[derive(Debug, Default)]
struct ChannelWindow {
    in_flight: u64,
    queue: VecDeque<Outbound>,
}

impl ChannelWindow {
    fn fits(&self, cost: u64, window: u64) -> bool {
        cost == 0 || self.in_flight == 0 || self.in_flight.saturating_add(cost) <= window
    }
}

// ============================================================================
// CongestionController
// ============================================================================

/// Paces outbound data per channel.
#[derive(Debug)]
pub struct CongestionController {
    window: u64,
    channels: FxHashMap<ChannelId, ChannelWindow>,
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl CongestionController {
    /// Creates a controller with the given window.
    #[inline]
    #[must_use]
    pub fn new(window: u64) -> Self {
        Self {
            window,
            channels: FxHashMap::default(),
        }
    }

    /// Returns the configured window.
    #[inline]
    #[must_use]
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Offers an item for transmission.
    ///
    /// Returns the item when it may be written now; otherwise it is queued
    /// behind earlier items of the same channel.
    pub fn submit(&mut self, channel: &ChannelId, item: Outbound) -> Option<Outbound> {
        let window = self.window;
        let state = self.channels.entry(channel.clone()).or_default();
        let cost = item.cost();

        if state.queue.is_empty() && state.fits(cost, window) {
            state.in_flight += cost;
            return Some(item);
        }

        state.queue.push_back(item);
        trace!(
            channel = %channel,
            in_flight = state.in_flight,
            queued = state.queue.len(),
            "Send queued by congestion window"
        );
        None
    }

    /// Credits `bytes` to a channel and returns the items now released.
    pub fn acknowledge(&mut self, channel: &ChannelId, bytes: u64) -> Vec<Outbound> {
        let window = self.window;
        let Some(state) = self.channels.get_mut(channel) else {
            return Vec::new();
        };

        state.in_flight = state.in_flight.saturating_sub(bytes);

        let mut released = Vec::new();
        while let Some(front) = state.queue.front() {
            let cost = front.cost();
            if !state.fits(cost, window) {
                break;
            }
            state.in_flight += cost;
            if let Some(item) = state.queue.pop_front() {
                released.push(item);
            }
        }

        if !released.is_empty() {
            trace!(
                channel = %channel,
                released = released.len(),
                in_flight = state.in_flight,
                "Congestion window reopened"
            );
        }

        released
    }

    /// Forgets a channel, returning how many queued items were discarded.
    pub fn remove(&mut self, channel: &ChannelId) -> usize {
        self.channels
            .remove(channel)
            .map_or(0, |state| state.queue.len())
    }

    /// Forgets every channel.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Returns the unacknowledged bytes of a channel.
    #[inline]
    #[must_use]
    pub fn in_flight(&self, channel: &ChannelId) -> u64 {
        self.channels.get(channel).map_or(0, |state| state.in_flight)
    }

    /// Returns the number of queued items of a channel.
    #[inline]
    #[must_use]
    pub fn queued(&self, channel: &ChannelId) -> usize {
        self.channels.get(channel).map_or(0, |state| state.queue.len())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::{Control, Payload};

    fn data(bytes: usize) -> Outbound {
        Outbound::Data(Payload::Text("x".repeat(bytes)))
    }

    #[test]
    fn test_within_window_passes() {
        let mut cc = CongestionController::new(10);
        let id = ChannelId::from("1");

        assert!(cc.submit(&id, data(4)).is_some());
        assert!(cc.submit(&id, data(6)).is_some());
        assert_eq!(cc.in_flight(&id), 10);
        assert_eq!(cc.queued(&id), 0);
    }

    #[test]
    fn test_exceeding_window_queues() {
        let mut cc = CongestionController::new(10);
        let id = ChannelId::from("1");

        assert!(cc.submit(&id, data(8)).is_some());
        assert!(cc.submit(&id, data(4)).is_none());
        assert!(cc.submit(&id, data(1)).is_none(), "must stay behind the queue");
        assert_eq!(cc.queued(&id), 2);
        assert_eq!(cc.in_flight(&id), 8);
    }

    #[test]
    fn test_ack_releases_in_order() {
        let mut cc = CongestionController::new(11);
        let id = ChannelId::from("1");

        let _ = cc.submit(&id, data(11));
        let _ = cc.submit(&id, Outbound::Data(Payload::from("first")));
        let _ = cc.submit(&id, Outbound::Data(Payload::from("second")));

        assert!(cc.acknowledge(&id, 3).is_empty());

        let released = cc.acknowledge(&id, 8);
        assert_eq!(
            released,
            vec![
                Outbound::Data(Payload::from("first")),
                Outbound::Data(Payload::from("second")),
            ]
        );
        assert_eq!(cc.in_flight(&id), 11);
    }

    #[test]
    fn test_oversized_payload_not_starved() {
        let mut cc = CongestionController::new(4);
        let id = ChannelId::from("1");

        assert!(cc.submit(&id, data(100)).is_some());
        assert!(cc.submit(&id, data(100)).is_none());
        assert_eq!(cc.acknowledge(&id, 100).len(), 1);
    }

    #[test]
    fn test_control_waits_behind_data() {
        let mut cc = CongestionController::new(4);
        let id = ChannelId::from("1");

        let _ = cc.submit(&id, data(4));
        let _ = cc.submit(&id, data(4));
        let close = Outbound::Control(Control::close(id.clone(), None));
        assert!(cc.submit(&id, close.clone()).is_none());

        let released = cc.acknowledge(&id, 4);
        assert_eq!(released, vec![data(4), close]);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut cc = CongestionController::new(4);
        let a = ChannelId::from("a");
        let b = ChannelId::from("b");

        let _ = cc.submit(&a, data(4));
        assert!(cc.submit(&a, data(1)).is_none());
        assert!(cc.submit(&b, data(4)).is_some());
    }

    #[test]
    fn test_remove_discards_queue() {
        let mut cc = CongestionController::new(1);
        let id = ChannelId::from("1");
        let _ = cc.submit(&id, data(1));
        let _ = cc.submit(&id, data(1));
        assert_eq!(cc.remove(&id), 1);
        assert_eq!(cc.in_flight(&id), 0);
        assert!(cc.acknowledge(&id, 1).is_empty());
    }
}
