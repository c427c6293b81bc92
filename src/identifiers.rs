//! Type-safe identifiers for channels.
//!
//! Channel ids are opaque strings on the wire. Locally allocated ids are
//! the bridge's channel seed followed by a per-connection counter, so ids
//! from two connections (or two nested frames) never collide.
//!
//! | Kind | Format | Example |
//! |------|--------|---------|
//! | Channel | `<seed><counter>` | `4:17` |
//! | Frame prefix | `<seed><counter>!` | `4:3!` |
//! | Channel in a frame | `<prefix><counter>` | `4:3!2` |

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// ChannelId
// ============================================================================

/// Identifier of one logical channel on a connection.
///
/// The control channel is addressed by the empty string on the wire and
/// never has a `ChannelId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Creates a channel id from any string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this id lives under the given frame prefix.
    #[inline]
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        in_prefix(&self.0, prefix)
    }
}

/// Returns `true` if the wire id `channel` lives under a frame prefix.
///
/// The empty prefix owns nothing.
#[inline]
#[must_use]
pub fn in_prefix(channel: &str, prefix: &str) -> bool {
    !prefix.is_empty() && channel.starts_with(prefix)
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ChannelId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ChannelIdAllocator
// ============================================================================

/// Generates channel ids from a seed and a monotonic counter.
///
/// The allocator does not know which ids are live; the registry checks
/// candidates against its map and asks again on collision.
#[derive(Debug, Clone)]
pub struct ChannelIdAllocator {
    seed: String,
    counter: u64,
}

impl ChannelIdAllocator {
    /// Creates an allocator for the given seed.
    #[inline]
    #[must_use]
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            counter: 0,
        }
    }

    /// Returns the seed.
    #[inline]
    #[must_use]
    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Replaces the seed. The counter keeps running.
    pub fn reseed(&mut self, seed: impl Into<String>) {
        self.seed = seed.into();
    }

    /// Returns the next candidate id.
    pub fn next_id(&mut self) -> ChannelId {
        self.counter += 1;
        ChannelId(format!("{}{}", self.seed, self.counter))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_sequence() {
        let mut alloc = ChannelIdAllocator::new("4:");
        assert_eq!(alloc.next_id().as_str(), "4:1");
        assert_eq!(alloc.next_id().as_str(), "4:2");
        assert_eq!(alloc.seed(), "4:");
    }

    #[test]
    fn test_reseed_keeps_counter() {
        let mut alloc = ChannelIdAllocator::new("a");
        let _ = alloc.next_id();
        alloc.reseed("b");
        assert_eq!(alloc.next_id().as_str(), "b2");
    }

    #[test]
    fn test_prefix_matching() {
        let id = ChannelId::from("4:3!2");
        assert!(id.has_prefix("4:3!"));
        assert!(!id.has_prefix("4:1!"));
        assert!(!ChannelId::from("4:3").has_prefix("4:3!"));
        assert!(!id.has_prefix(""));
        assert!(in_prefix("4:3!2", "4:3!"));
        assert!(!in_prefix("4:3!2", ""));
    }

    #[test]
    fn test_serde_transparent() {
        let id = ChannelId::from("x7");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"x7\"");
        let back: ChannelId = serde_json::from_str("\"x7\"").expect("parse");
        assert_eq!(back, id);
    }
}
