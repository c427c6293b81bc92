//! Problem codes carried by `close` control messages.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Problem
// ============================================================================

/// Reason a channel or connection was closed.
///
/// Serialized as the bare kebab-case string the bridge uses. Codes the
/// client does not know are kept verbatim in [`Problem::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Problem {
    /// Handshake violation or malformed open options.
    ProtocolError,
    /// Target (address, file, service) does not exist.
    NotFound,
    /// Permission denied by the host.
    AccessDenied,
    /// Process or stream ended abnormally.
    Terminated,
    /// Target host has no bridge installed.
    NoCockpit,
    /// Transport went away.
    Disconnected,
    /// Requested payload type or command not supported.
    NotSupported,
    /// Operation timed out on the host.
    Timeout,
    /// Unexpected failure inside the bridge.
    InternalError,
    /// Credentials rejected.
    AuthenticationFailed,
    /// Any other problem string.
    Other(String),
}

impl Problem {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ProtocolError => "protocol-error",
            Self::NotFound => "not-found",
            Self::AccessDenied => "access-denied",
            Self::Terminated => "terminated",
            Self::NoCockpit => "no-cockpit",
            Self::Disconnected => "disconnected",
            Self::NotSupported => "not-supported",
            Self::Timeout => "timeout",
            Self::InternalError => "internal-error",
            Self::AuthenticationFailed => "authentication-failed",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Problem {
    fn from(value: String) -> Self {
        match value.as_str() {
            "protocol-error" => Self::ProtocolError,
            "not-found" => Self::NotFound,
            "access-denied" => Self::AccessDenied,
            "terminated" => Self::Terminated,
            "no-cockpit" => Self::NoCockpit,
            "disconnected" => Self::Disconnected,
            "not-supported" => Self::NotSupported,
            "timeout" => Self::Timeout,
            "internal-error" => Self::InternalError,
            "authentication-failed" => Self::AuthenticationFailed,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for Problem {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<Problem> for String {
    fn from(value: Problem) -> Self {
        match value {
            Problem::Other(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(Problem::from("not-found"), Problem::NotFound);
        assert_eq!(Problem::from("protocol-error"), Problem::ProtocolError);
        assert_eq!(Problem::NoCockpit.to_string(), "no-cockpit");
    }

    #[test]
    fn test_unknown_code_preserved() {
        let problem = Problem::from("unknown-hostkey");
        assert_eq!(problem, Problem::Other("unknown-hostkey".into()));
        assert_eq!(problem.as_str(), "unknown-hostkey");
    }

    #[test]
    fn test_serde_as_plain_string() {
        let json = serde_json::to_string(&Problem::AccessDenied).expect("serialize");
        assert_eq!(json, "\"access-denied\"");
        let back: Problem = serde_json::from_str("\"terminated\"").expect("parse");
        assert_eq!(back, Problem::Terminated);
    }
}
