//! Relay transport for nested frames.
//!
//! A nested frame has no socket of its own. It exchanges
//! [`RelayMessage`] envelopes with its parent connection, and each
//! envelope carries exactly one text wire message. Both ends check the
//! envelope origin and drop anything from an unexpected sender.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::protocol::WireMessage;

use super::{Transport, TransportSink, TransportStream};

// ============================================================================
// RelayMessage
// ============================================================================

/// One envelope between a frame and its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    /// Origin of the sender.
    pub origin: String,
    /// Wire message text, `"<channel>\n<payload>"`.
    pub data: String,
}

// ============================================================================
// FramePort
// ============================================================================

/// Parent side of a relay pair.
#[derive(Debug)]
pub(crate) struct FramePort {
    pub to_child: mpsc::UnboundedSender<RelayMessage>,
    pub from_child: mpsc::UnboundedReceiver<RelayMessage>,
}

/// Creates a connected parent port and child transport.
pub(crate) fn pair(parent_origin: String, child_origin: String) -> (FramePort, RelayTransport) {
    let (to_child, from_parent) = mpsc::unbounded_channel();
    let (to_parent, from_child) = mpsc::unbounded_channel();

    let port = FramePort {
        to_child,
        from_child,
    };
    let transport = RelayTransport::new(child_origin, parent_origin, to_parent, from_parent);
    (port, transport)
}

// ============================================================================
// RelayTransport
// ============================================================================

/// Child side of a relay: a text-only transport over envelopes.
#[derive(Debug)]
pub struct RelayTransport {
    origin: String,
    parent_origin: String,
    to_parent: mpsc::UnboundedSender<RelayMessage>,
    from_parent: mpsc::UnboundedReceiver<RelayMessage>,
}

impl RelayTransport {
    /// Creates a relay transport.
    ///
    /// `origin` is stamped on outgoing envelopes; incoming envelopes must
    /// carry `parent_origin`.
    #[must_use]
    pub fn new(
        origin: impl Into<String>,
        parent_origin: impl Into<String>,
        to_parent: mpsc::UnboundedSender<RelayMessage>,
        from_parent: mpsc::UnboundedReceiver<RelayMessage>,
    ) -> Self {
        Self {
            origin: origin.into(),
            parent_origin: parent_origin.into(),
            to_parent,
            from_parent,
        }
    }

    /// Origin the parent must use.
    #[inline]
    #[must_use]
    pub fn parent_origin(&self) -> &str {
        &self.parent_origin
    }
}

impl Transport for RelayTransport {
    fn supports_binary(&self) -> bool {
        false
    }

    fn origin(&self) -> Option<String> {
        Some(self.origin.clone())
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportSink>, Box<dyn TransportStream>) {
        let Self {
            origin,
            parent_origin,
            to_parent,
            from_parent,
        } = *self;
        (
            Box::new(RelaySink {
                origin,
                to_parent: Some(to_parent),
            }),
            Box::new(RelayStream {
                parent_origin,
                from_parent,
            }),
        )
    }
}

// ============================================================================
// Halves
// ============================================================================

struct RelaySink {
    origin: String,
    to_parent: Option<mpsc::UnboundedSender<RelayMessage>>,
}

#[async_trait]
impl TransportSink for RelaySink {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let WireMessage::Text(data) = message else {
            return Err(Error::invalid_argument("relay carries text messages only"));
        };
        let to_parent = self.to_parent.as_ref().ok_or(Error::ConnectionClosed)?;
        to_parent
            .send(RelayMessage {
                origin: self.origin.clone(),
                data,
            })
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        trace!("Relay sink closed");
        self.to_parent = None;
        Ok(())
    }
}

struct RelayStream {
    parent_origin: String,
    from_parent: mpsc::UnboundedReceiver<RelayMessage>,
}

#[async_trait]
impl TransportStream for RelayStream {
    async fn recv(&mut self) -> Option<Result<WireMessage>> {
        loop {
            let message = self.from_parent.recv().await?;
            if message.origin != self.parent_origin {
                warn!(
                    origin = %message.origin,
                    expected = %self.parent_origin,
                    "Dropping relayed message from unexpected origin"
                );
                continue;
            }
            return Some(Ok(WireMessage::Text(message.data)));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
