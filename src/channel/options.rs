//! Channel open options.
//!
//! Provides a type-safe interface for the key/value map merged into an
//! `open` control message. The common fields are typed; payload-specific
//! fields (`spawn`, `path`, `address`, ...) go into an open JSON map.
//!
//! # Example
//!
//! ```ignore
//! use cockpit_transport::ChannelOptions;
//!
//! let options = ChannelOptions::spawn(["journalctl", "-f"])
//!     .with_host("server1")
//!     .with("err", "message");
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Constants
// ============================================================================

/// Group name that turns a channel into a fence.
pub const FENCE_GROUP: &str = "fence";

// ============================================================================
// ChannelOptions
// ============================================================================

/// Options sent with `open`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Payload type tag (`stream`, `echo`, `fsread1`, `dbus-json3`, ...).
    pub payload: String,

    /// Target host; the bridge default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Binary mode, fixed for the life of the channel.
    #[serde(default, with = "raw_flag", skip_serializing_if = "is_false")]
    pub binary: bool,

    /// Ordering group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Payload-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Constructors
// ============================================================================

impl ChannelOptions {
    /// Creates options for the given payload type.
    #[inline]
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// Channel that echoes everything back.
    #[inline]
    #[must_use]
    pub fn echo() -> Self {
        Self::new("echo")
    }

    /// Channel that discards everything.
    #[inline]
    #[must_use]
    pub fn null() -> Self {
        Self::new("null")
    }

    /// Stream attached to a spawned process.
    #[must_use]
    pub fn spawn(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let argv: Vec<Value> = argv.into_iter().map(|a| Value::String(a.into())).collect();
        Self::new("stream").with("spawn", Value::Array(argv))
    }

    /// Stream attached to a TCP address.
    #[must_use]
    pub fn stream(address: impl Into<String>, port: u16) -> Self {
        Self::new("stream")
            .with("address", Value::String(address.into()))
            .with("port", port)
    }

    /// Stream attached to a unix socket.
    #[must_use]
    pub fn unix(path: impl Into<String>) -> Self {
        Self::new("stream").with("unix", Value::String(path.into()))
    }

    /// Reads a file.
    #[must_use]
    pub fn fsread(path: impl Into<String>) -> Self {
        Self::new("fsread1").with("path", Value::String(path.into()))
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ChannelOptions {
    /// Sets the target host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets binary mode.
    #[inline]
    #[must_use]
    pub fn with_binary(mut self, binary: bool) -> Self {
        self.binary = binary;
        self
    }

    /// Sets the ordering group.
    #[inline]
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Makes this channel a fence.
    #[inline]
    #[must_use]
    pub fn with_fence(self) -> Self {
        self.with_group(FENCE_GROUP)
    }

    /// Sets a payload-specific field.
    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ChannelOptions {
    /// Returns `true` if the channel is a fence.
    #[inline]
    #[must_use]
    pub fn is_fence(&self) -> bool {
        self.group.as_deref() == Some(FENCE_GROUP)
    }

    /// Returns a payload-specific field.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// `binary` is `"raw"` on the wire; older peers send `"base64"` or a bool.
mod raw_flag {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(binary: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        if *binary {
            serializer.serialize_str("raw")
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(mode)) => mode == "raw" || mode == "base64",
            Some(Value::Bool(flag)) => flag,
            _ => false,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_new_defaults() {
        let options = ChannelOptions::new("dbus-json3");
        assert_eq!(options.payload, "dbus-json3");
        assert!(options.host.is_none());
        assert!(!options.binary);
        assert!(!options.is_fence());
        assert!(options.extra.is_empty());
    }

    #[test]
    fn test_spawn_helper() {
        let options = ChannelOptions::spawn(["ls", "-l"]);
        assert_eq!(options.payload, "stream");
        assert_eq!(options.get("spawn"), Some(&json!(["ls", "-l"])));
    }

    #[test]
    fn test_stream_helper() {
        let options = ChannelOptions::stream("127.0.0.99", 2222);
        assert_eq!(options.get("address"), Some(&json!("127.0.0.99")));
        assert_eq!(options.get("port"), Some(&json!(2222)));
    }

    #[test]
    fn test_fence() {
        assert!(ChannelOptions::null().with_fence().is_fence());
        assert!(!ChannelOptions::null().with_group("other").is_fence());
    }

    #[test]
    fn test_serialize_omits_defaults() {
        let json = serde_json::to_value(ChannelOptions::echo()).expect("serialize");
        assert_eq!(json, json!({"payload": "echo"}));
    }

    #[test]
    fn test_binary_flag_forms() {
        let parse = |v: Value| -> bool {
            serde_json::from_value::<ChannelOptions>(v)
                .expect("parse")
                .binary
        };
        assert!(parse(json!({"payload": "echo", "binary": "raw"})));
        assert!(parse(json!({"payload": "echo", "binary": "base64"})));
        assert!(parse(json!({"payload": "echo", "binary": true})));
        assert!(!parse(json!({"payload": "echo"})));
    }

    #[test]
    fn test_unix_and_fsread_helpers() {
        assert_eq!(
            ChannelOptions::unix("/run/x.sock").get("unix"),
            Some(&json!("/run/x.sock"))
        );
        let read = ChannelOptions::fsread("/etc/hostname");
        assert_eq!(read.payload, "fsread1");
        assert_eq!(read.get("path"), Some(&json!("/etc/hostname")));
    }
}
