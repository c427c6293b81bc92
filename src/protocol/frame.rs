//! Wire codec.
//!
//! Every message on the socket is `"<channel>\n<payload>"`. The control
//! channel uses the empty id and carries a JSON object. Binary payloads
//! travel as native binary frames when the transport supports them and as
//! base64 text otherwise.
//!
//! The codec is a pure transform: one call per inbound or outbound
//! message, no buffering.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;

use super::Control;

// ============================================================================
// Constants
// ============================================================================

/// Separator between channel id and payload.
pub const SEPARATOR: u8 = b'\n';

// ============================================================================
// WireMessage
// ============================================================================

/// One physical message on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl WireMessage {
    /// Returns the encoded size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` if the message is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Data carried on a channel.
///
/// Text channels carry [`Payload::Text`], binary channels carry
/// [`Payload::Binary`]. The mode is fixed when the channel is opened.
#[derive(Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the payload size in bytes.
    ///
    /// This is the unit the congestion window is accounted in.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` for binary payloads.
    #[inline]
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Returns the text, if this is a text payload.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the raw bytes of either variant.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Consumes the payload and returns its bytes.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) if text.len() <= 64 => f.debug_tuple("Text").field(text).finish(),
            Self::Text(text) => write!(f, "Text({} bytes)", text.len()),
            Self::Binary(bytes) => write!(f, "Binary({} bytes)", bytes.len()),
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Self::Binary(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Payload {
    fn from(value: &[u8; N]) -> Self {
        Self::Binary(value.to_vec())
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Channel id, empty for the control channel.
    pub channel: String,
    /// Payload as it arrived. Base64 text is not decoded here.
    pub payload: Payload,
}

impl Frame {
    /// Returns `true` if this frame belongs to the control channel.
    #[inline]
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.channel.is_empty()
    }

    /// Returns the channel id of a data frame.
    #[inline]
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        (!self.is_control()).then(|| ChannelId::from(self.channel.as_str()))
    }

    /// Parses the payload of a control frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Framing`] if this is not a control frame or is not UTF-8
    /// - [`Error::Json`] / [`Error::Protocol`] from [`Control::parse`]
    pub fn control(&self) -> Result<Control> {
        if !self.is_control() {
            return Err(Error::framing(format!(
                "frame on channel {} is not a control frame",
                self.channel
            )));
        }
        match &self.payload {
            Payload::Text(text) => Control::parse(text),
            Payload::Binary(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| Error::framing("control frame is not UTF-8"))?;
                Control::parse(text)
            }
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a channel payload into a wire message.
///
/// With `binary_frames` false, binary payloads are base64 encoded into a
/// text message.
#[must_use]
pub fn encode(channel: &str, payload: &Payload, binary_frames: bool) -> WireMessage {
    match payload {
        Payload::Text(text) => {
            let mut out = String::with_capacity(channel.len() + 1 + text.len());
            out.push_str(channel);
            out.push(SEPARATOR as char);
            out.push_str(text);
            WireMessage::Text(out)
        }
        Payload::Binary(bytes) if binary_frames => {
            let mut out = Vec::with_capacity(channel.len() + 1 + bytes.len());
            out.extend_from_slice(channel.as_bytes());
            out.push(SEPARATOR);
            out.extend_from_slice(bytes);
            WireMessage::Binary(out)
        }
        Payload::Binary(bytes) => {
            let mut out = String::with_capacity(channel.len() + 1 + bytes.len() * 4 / 3 + 4);
            out.push_str(channel);
            out.push(SEPARATOR as char);
            STANDARD.encode_string(bytes, &mut out);
            WireMessage::Text(out)
        }
    }
}

/// Encodes a control message onto the control channel.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode_control(control: &Control) -> Result<WireMessage> {
    let json = serde_json::to_string(control)?;
    let mut out = String::with_capacity(json.len() + 1);
    out.push(SEPARATOR as char);
    out.push_str(&json);
    Ok(WireMessage::Text(out))
}

// ============================================================================
// Decoding
// ============================================================================

/// Splits a wire message into channel id and payload.
///
/// # Errors
///
/// Returns [`Error::Framing`] if no separator is present or the channel
/// id of a binary frame is not UTF-8.
pub fn decode(message: WireMessage) -> Result<Frame> {
    match message {
        WireMessage::Text(mut text) => {
            let split = text
                .find(SEPARATOR as char)
                .ok_or_else(|| Error::framing("missing channel separator"))?;
            let payload = text.split_off(split + 1);
            text.truncate(split);
            Ok(Frame {
                channel: text,
                payload: Payload::Text(payload),
            })
        }
        WireMessage::Binary(mut bytes) => {
            let split = bytes
                .iter()
                .position(|&b| b == SEPARATOR)
                .ok_or_else(|| Error::framing("missing channel separator"))?;
            let payload = bytes.split_off(split + 1);
            bytes.truncate(split);
            let channel = String::from_utf8(bytes)
                .map_err(|_| Error::framing("channel id is not UTF-8"))?;
            Ok(Frame {
                channel,
                payload: Payload::Binary(payload),
            })
        }
    }
}

/// Decodes the base64 text used for binary payloads on text transports.
///
/// # Errors
///
/// Returns [`Error::Framing`] if the text is not valid base64.
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| Error::framing(format!("invalid base64 payload: {e}")))
}

/// Encodes bytes as the base64 text used on text transports.
#[inline]
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

// ============================================================================
// Tests
// ============================================================================
