//! Channel registry.
//!
//! Maps live channel ids to their bookkeeping and allocates fresh ids.
//! Owned by the connection's multiplexer; never shared on its own.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::flow::Outbound;
use crate::identifiers::{ChannelId, ChannelIdAllocator};

use super::{ChannelEvent, ChannelState};

// ============================================================================
// ChannelEntry
// ============================================================================

/// Per-channel state kept by the connection.
#[derive(Debug)]
pub(crate) struct ChannelEntry {
    /// Payload mode, fixed at open.
    pub binary: bool,
    /// Lifecycle state.
    pub state: ChannelState,
    /// Set once `ready` arrived.
    pub accepted: bool,
    /// Items issued before `ready`, flushed in order on acceptance.
    pub held: VecDeque<Outbound>,
    /// Event stream of the channel handle.
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelEntry {
    /// Creates an entry in `init` state.
    pub fn new(binary: bool, events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            binary,
            state: ChannelState::Init,
            accepted: false,
            held: VecDeque::new(),
            events,
        }
    }

    /// Delivers an event to the channel handle.
    ///
    /// A dropped handle is not an error; the event is discarded.
    pub fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            trace!("Channel handle gone, event discarded");
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Live channels of one connection.
#[derive(Debug)]
pub(crate) struct Registry {
    channels: FxHashMap<ChannelId, ChannelEntry>,
    allocator: ChannelIdAllocator,
}

impl Registry {
    /// Creates an empty registry with the given seed.
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            channels: FxHashMap::default(),
            allocator: ChannelIdAllocator::new(seed),
        }
    }

    /// Replaces the id seed.
    pub fn reseed(&mut self, seed: impl Into<String>) {
        self.allocator.reseed(seed);
    }

    /// Allocates an id that no live channel uses.
    pub fn allocate(&mut self) -> ChannelId {
        loop {
            let id = self.allocator.next_id();
            if !self.channels.contains_key(&id) {
                return id;
            }
        }
    }

    /// Allocates an id prefix for a nested frame.
    pub fn allocate_prefix(&mut self) -> String {
        format!("{}!", self.allocate())
    }

    pub fn insert(&mut self, id: ChannelId, entry: ChannelEntry) {
        self.channels.insert(id, entry);
    }

    pub fn get(&self, id: &str) -> Option<&ChannelEntry> {
        self.channels.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ChannelEntry> {
        self.channels.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<ChannelEntry> {
        self.channels.remove(id)
    }

    /// Removes every entry.
    pub fn drain(&mut self) -> Vec<(ChannelId, ChannelEntry)> {
        self.channels.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
