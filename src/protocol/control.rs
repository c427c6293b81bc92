//! Control messages.
//!
//! Control messages travel on the control channel (empty id) as JSON
//! objects with a mandatory `command` field. Each command the client
//! understands has its own variant; anything else is kept as
//! [`Control::Other`] so it can still be routed to its channel.
//!
//! | Command | Direction | Purpose |
//! |---------|-----------|---------|
//! | `init` | both | Handshake, must be the first message each way |
//! | `open` | client → bridge | Open a channel |
//! | `ready` | bridge → client | Channel accepted |
//! | `close` | both | Close a channel, or the connection without `channel` |
//! | `done` | both | End of input on a channel |
//! | `ack` | bridge → client | Credit the congestion window |
//! | `ping` / `pong` | both | Liveness |
//! | `authorize` | both | Credential challenge |
//! | `logout` | client → bridge | End the session |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channel::ChannelOptions;
use crate::error::{Error, Result};
use crate::identifiers::ChannelId;

use super::Problem;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version spoken by this client.
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands decoded into dedicated variants.
const KNOWN_COMMANDS: &[&str] = &[
    "init",
    "open",
    "ready",
    "close",
    "done",
    "ack",
    "ping",
    "pong",
    "authorize",
    "logout",
];

// ============================================================================
// Init
// ============================================================================

/// Handshake payload.
///
/// The bridge's `init` carries the channel seed, default host, CSRF token
/// and capabilities; the client's own `init` only needs the version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Init {
    /// Protocol version.
    pub version: u32,

    /// Prefix for locally allocated channel ids.
    #[serde(
        rename = "channel-seed",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub channel_seed: Option<String>,

    /// Default host for channels that do not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// CSRF token for HTTP requests made alongside the socket.
    #[serde(rename = "csrf-token", default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,

    /// Capabilities, either a list of names or an object keyed by name.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub capabilities: Value,

    /// Remaining fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Init {
    /// Creates a minimal `init` for the given version.
    #[must_use]
    pub fn new(version: u32) -> Self {
        Self {
            version,
            channel_seed: None,
            host: None,
            csrf_token: None,
            capabilities: Value::Null,
            fields: Map::new(),
        }
    }

    /// Returns `true` if the bridge advertised the capability.
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        match &self.capabilities {
            Value::Array(items) => items.iter().any(|item| item.as_str() == Some(name)),
            Value::Object(map) => map
                .get(name)
                .is_some_and(|value| !matches!(value, Value::Null | Value::Bool(false))),
            _ => false,
        }
    }
}

// ============================================================================
// Control
// ============================================================================

/// A control-channel message, keyed by its `command` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Control {
    /// Handshake.
    Init(Init),

    /// Request to open a channel.
    Open {
        /// Channel being opened.
        channel: ChannelId,
        /// Open options merged into the message.
        #[serde(flatten)]
        options: ChannelOptions,
    },

    /// Channel accepted by the bridge.
    Ready {
        /// Accepted channel.
        channel: ChannelId,
        /// Payload-specific extras.
        #[serde(flatten)]
        fields: Map<String, Value>,
    },

    /// Close a channel, or the connection when `channel` is absent.
    Close {
        /// Channel being closed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<ChannelId>,
        /// Failure code; absent on clean shutdown.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        problem: Option<Problem>,
        /// Human readable detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Payload-specific extras (exit status, signal, ...).
        #[serde(flatten)]
        fields: Map<String, Value>,
    },

    /// End of input on a channel.
    Done {
        /// Channel that finished sending.
        channel: ChannelId,
    },

    /// Window credit for a channel.
    Ack {
        /// Channel being credited.
        channel: ChannelId,
        /// Payload bytes consumed by the peer.
        bytes: u64,
    },

    /// Liveness check, answered with `pong`.
    Ping {
        /// Channel the ping belongs to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<ChannelId>,
        /// Extra fields echoed back in the reply.
        #[serde(flatten)]
        fields: Map<String, Value>,
    },

    /// Reply to `ping`.
    Pong {
        /// Channel the reply belongs to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<ChannelId>,
        /// Fields copied from the ping.
        #[serde(flatten)]
        fields: Map<String, Value>,
    },

    /// Credential challenge or response.
    Authorize {
        /// Challenge fields.
        #[serde(flatten)]
        fields: Map<String, Value>,
    },

    /// End the login session.
    Logout {
        /// Ask the bridge to drop every session of the user.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disconnect: Option<bool>,
    },

    /// Any command without a dedicated variant, kept verbatim.
    #[serde(untagged)]
    Other(Map<String, Value>),
}

// ============================================================================
// Control - Constructors
// ============================================================================

impl Control {
    /// The client's handshake message.
    #[inline]
    #[must_use]
    pub fn client_init() -> Self {
        Self::Init(Init::new(PROTOCOL_VERSION))
    }

    /// Opens `channel` with `options`.
    #[inline]
    #[must_use]
    pub fn open(channel: ChannelId, options: ChannelOptions) -> Self {
        Self::Open { channel, options }
    }

    /// Closes `channel`, optionally with a problem.
    #[inline]
    #[must_use]
    pub fn close(channel: ChannelId, problem: Option<Problem>) -> Self {
        Self::Close {
            channel: Some(channel),
            problem,
            message: None,
            fields: Map::new(),
        }
    }

    /// Signals end of input on `channel`.
    #[inline]
    #[must_use]
    pub fn done(channel: ChannelId) -> Self {
        Self::Done { channel }
    }

    /// Credits `bytes` to `channel`.
    #[inline]
    #[must_use]
    pub fn ack(channel: ChannelId, bytes: u64) -> Self {
        Self::Ack { channel, bytes }
    }

    /// Logs the session out.
    #[inline]
    #[must_use]
    pub fn logout(disconnect: bool) -> Self {
        Self::Logout {
            disconnect: Some(disconnect),
        }
    }
}

// ============================================================================
// Control - Parsing
// ============================================================================

impl Control {
    /// Parses a control payload.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the payload is not JSON or a known command has
    ///   malformed fields
    /// - [`Error::Protocol`] if it is not an object or lacks `command`
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(object) = value else {
            return Err(Error::protocol("control message is not a JSON object"));
        };

        let Some(command) = object.get("command").and_then(Value::as_str) else {
            return Err(Error::protocol("control message has no command"));
        };

        if !KNOWN_COMMANDS.contains(&command) {
            return Ok(Self::Other(object));
        }

        let command = command.to_owned();
        match serde_json::from_value(Value::Object(object))? {
            Self::Other(_) => Err(Error::Json(serde::de::Error::custom(format!(
                "malformed {command} message"
            )))),
            control => Ok(control),
        }
    }

    /// Serializes to the JSON text sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Control - Accessors
// ============================================================================

impl Control {
    /// Returns the `command` string.
    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            Self::Init(_) => "init",
            Self::Open { .. } => "open",
            Self::Ready { .. } => "ready",
            Self::Close { .. } => "close",
            Self::Done { .. } => "done",
            Self::Ack { .. } => "ack",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Authorize { .. } => "authorize",
            Self::Logout { .. } => "logout",
            Self::Other(map) => map.get("command").and_then(Value::as_str).unwrap_or_default(),
        }
    }

    /// Returns the channel this message is addressed to.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Open { channel, .. }
            | Self::Ready { channel, .. }
            | Self::Done { channel }
            | Self::Ack { channel, .. } => Some(channel.as_str()),
            Self::Close { channel, .. } | Self::Ping { channel, .. } | Self::Pong { channel, .. } => {
                channel.as_ref().map(ChannelId::as_str)
            }
            Self::Other(map) => map.get("channel").and_then(Value::as_str),
            Self::Init(_) | Self::Authorize { .. } | Self::Logout { .. } => None,
        }
    }

    /// Returns `true` if this is an `open`.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Returns `true` if this is a `close`.
    #[inline]
    #[must_use]
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close { .. })
    }

    /// Re-addresses the message to `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for commands that are never
    /// channel scoped (`init`, `authorize`, `logout`).
    pub fn scoped_to(self, id: &ChannelId) -> Result<Self> {
        let scoped = match self {
            Self::Open { options, .. } => Self::Open {
                channel: id.clone(),
                options,
            },
            Self::Ready { fields, .. } => Self::Ready {
                channel: id.clone(),
                fields,
            },
            Self::Close {
                problem,
                message,
                fields,
                ..
            } => Self::Close {
                channel: Some(id.clone()),
                problem,
                message,
                fields,
            },
            Self::Done { .. } => Self::Done {
                channel: id.clone(),
            },
            Self::Ack { bytes, .. } => Self::Ack {
                channel: id.clone(),
                bytes,
            },
            Self::Ping { fields, .. } => Self::Ping {
                channel: Some(id.clone()),
                fields,
            },
            Self::Pong { fields, .. } => Self::Pong {
                channel: Some(id.clone()),
                fields,
            },
            Self::Other(mut map) => {
                map.insert("channel".into(), Value::String(id.to_string()));
                Self::Other(map)
            }
            other @ (Self::Init(_) | Self::Authorize { .. } | Self::Logout { .. }) => {
                return Err(Error::invalid_argument(format!(
                    "{} is not a channel command",
                    other.command()
                )));
            }
        };
        Ok(scoped)
    }

    /// Builds the `pong` answering a `ping`.
    #[must_use]
    pub fn pong_for(&self) -> Option<Self> {
        match self {
            Self::Ping { channel, fields } => Some(Self::Pong {
                channel: channel.clone(),
                fields: fields.clone(),
            }),
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

    use serde_json::json;

    #[test]
    fn test_parse_bridge_init() {
        let control = Control::parse(
            r#"{"command":"init","version":1,"channel-seed":"4:","host":"localhost",
                "csrf-token":"abc","capabilities":{"explicit-superuser":true},"os-release":{}}"#,
        )
        .expect("parse");

        let Control::Init(init) = control else {
            panic!("expected init");
        };
        assert_eq!(init.version, 1);
        assert_eq!(init.channel_seed.as_deref(), Some("4:"));
        assert_eq!(init.host.as_deref(), Some("localhost"));
        assert_eq!(init.csrf_token.as_deref(), Some("abc"));
        assert!(init.has_capability("explicit-superuser"));
        assert!(!init.has_capability("multi"));
        assert!(init.fields.contains_key("os-release"));
    }

    #[test]
    fn test_capabilities_as_list() {
        let mut init = Init::new(1);
        init.capabilities = json!(["binary", "ssh"]);
        assert!(init.has_capability("ssh"));
        assert!(!init.has_capability("tls"));
    }

    #[test]
    fn test_client_init_serialization() {
        let json = Control::client_init().to_json().expect("serialize");
        assert_eq!(json, r#"{"command":"init","version":1}"#);
    }

    #[test]
    fn test_open_merges_options() {
        let options = ChannelOptions::stream("127.0.0.1", 22).with_binary(true);
        let json = Control::open(ChannelId::from("4:1"), options)
            .to_json()
            .expect("serialize");
        let value: Value = serde_json::from_str(&json).expect("json");

        assert_eq!(value["command"], "open");
        assert_eq!(value["channel"], "4:1");
        assert_eq!(value["payload"], "stream");
        assert_eq!(value["address"], "127.0.0.1");
        assert_eq!(value["port"], 22);
        assert_eq!(value["binary"], "raw");
    }

    #[test]
    fn test_open_roundtrip() {
        let control = Control::open(
            ChannelId::from("9"),
            ChannelOptions::spawn(["cat"]).with_fence(),
        );
        let back = Control::parse(&control.to_json().expect("serialize")).expect("parse");
        assert_eq!(back, control);
    }

    #[test]
    fn test_parse_close_with_problem() {
        let control = Control::parse(
            r#"{"command":"close","channel":"5","problem":"not-found","message":"no route","exit-status":1}"#,
        )
        .expect("parse");

        let Control::Close {
            channel,
            problem,
            message,
            fields,
        } = control
        else {
            panic!("expected close");
        };
        assert_eq!(channel, Some(ChannelId::from("5")));
        assert_eq!(problem, Some(Problem::NotFound));
        assert_eq!(message.as_deref(), Some("no route"));
        assert_eq!(fields.get("exit-status"), Some(&json!(1)));
    }

    #[test]
    fn test_clean_close_has_no_problem_field() {
        let json = Control::close(ChannelId::from("5"), None)
            .to_json()
            .expect("serialize");
        assert_eq!(json, r#"{"command":"close","channel":"5"}"#);
    }

    #[test]
    fn test_parse_ack() {
        let control = Control::parse(r#"{"command":"ack","channel":"3","bytes":4096}"#).expect("parse");
        assert_eq!(control, Control::ack(ChannelId::from("3"), 4096));
    }

    #[test]
    fn test_unknown_command_kept() {
        let control =
            Control::parse(r#"{"command":"options","channel":"3","window":10}"#).expect("parse");
        assert!(matches!(control, Control::Other(_)));
        assert_eq!(control.command(), "options");
        assert_eq!(control.channel(), Some("3"));

        let json = control.to_json().expect("serialize");
        let value: Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["command"], "options");
        assert_eq!(value["window"], 10);
    }

    #[test]
    fn test_missing_command() {
        assert!(matches!(
            Control::parse(r#"{"channel":"3"}"#),
            Err(Error::Protocol { .. })
        ));
        assert!(matches!(Control::parse("[1,2]"), Err(Error::Protocol { .. })));
        assert!(matches!(Control::parse("{"), Err(Error::Json(_))));
    }

    #[test]
    fn test_malformed_known_command() {
        assert!(Control::parse(r#"{"command":"ack","channel":"3"}"#).is_err());
        assert!(matches!(
            Control::parse(r#"{"command":"ack","channel":"3","bytes":"4"}"#),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            Control::parse(r#"{"command":"close","channel":"3","message":7}"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_scoped_to() {
        let id = ChannelId::from("12");
        let done = Control::done(ChannelId::from("0")).scoped_to(&id).expect("scope");
        assert_eq!(done.channel(), Some("12"));

        let other = Control::Other(
            json!({"command": "kill", "signal": "TERM"})
                .as_object()
                .cloned()
                .expect("object"),
        );
        assert_eq!(other.scoped_to(&id).expect("scope").channel(), Some("12"));

        assert!(Control::logout(false).scoped_to(&id).is_err());
    }

    #[test]
    fn test_pong_for_ping() {
        let ping = Control::parse(r#"{"command":"ping","sequence":4}"#).expect("parse");
        let pong = ping.pong_for().expect("pong");
        assert_eq!(pong.command(), "pong");
        let value: Value = serde_json::from_str(&pong.to_json().expect("json")).expect("json");
        assert_eq!(value["sequence"], 4);
        assert!(Control::logout(true).pong_for().is_none());
    }
}
