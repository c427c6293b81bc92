//! Channel handle.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::core::HandleGuard;
use crate::connection::mux::Multiplexer;
use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::{Control, Payload, Problem};

use super::{ChannelEvent, ChannelOptions, ChannelState};

// ============================================================================
// Channel
// ============================================================================

/// One logical stream on a [`Connection`](crate::Connection).
///
/// Sends are non-blocking: they are queued on the connection and paced by
/// the fence and congestion gates. Received data and control messages are
/// read with [`recv`](Self::recv).
///
/// Dropping an open channel closes it.
///
/// # Example
///
/// ```ignore
/// let mut channel = connection.open(ChannelOptions::echo())?;
/// channel.send("hello")?;
/// while let Some(event) = channel.recv().await {
///     println!("{event:?}");
/// }
/// ```
pub struct Channel {
    id: ChannelId,
    options: ChannelOptions,
    mux: Arc<Mutex<Multiplexer>>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    /// Events read ahead by [`wait_ready`](Self::wait_ready).
    backlog: VecDeque<ChannelEvent>,
    terminated: bool,
    /// Keeps the connection open while the channel lives.
    _guard: Arc<HandleGuard>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("payload", &self.options.payload)
            .field("binary", &self.options.binary)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(
        id: ChannelId,
        options: ChannelOptions,
        mux: Arc<Mutex<Multiplexer>>,
        guard: Arc<HandleGuard>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            id,
            options,
            mux,
            events,
            backlog: VecDeque::new(),
            terminated: false,
            _guard: guard,
        }
    }
}

// ============================================================================
// Channel - Accessors
// ============================================================================

impl Channel {
    /// Returns the channel id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Returns the options the channel was opened with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Returns `true` for binary channels.
    #[inline]
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.options.binary
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.mux.lock().channel_state(&self.id)
    }
}

// ============================================================================
// Channel - Sending
// ============================================================================

impl Channel {
    /// Sends data on the channel.
    ///
    /// Text channels take text, binary channels take bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the channel is closing or closed
    /// - [`Error::InvalidArgument`] if the payload mode does not match
    pub fn send(&self, payload: impl Into<Payload>) -> Result<()> {
        self.mux.lock().send(&self.id, payload.into())
    }

    /// Sends a control message addressed to this channel.
    ///
    /// The `channel` field is overwritten with this channel's id. A
    /// `close` is handled as [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the channel is closing or closed
    /// - [`Error::InvalidArgument`] for commands that are not channel scoped
    pub fn control(&self, control: Control) -> Result<()> {
        self.mux.lock().channel_control(&self.id, control)
    }

    /// Signals end of input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the channel is closing or closed.
    pub fn done(&self) -> Result<()> {
        self.control(Control::done(self.id.clone()))
    }

    /// Requests close, optionally with a problem.
    ///
    /// Data sent before the close is transmitted first. Closing twice, or
    /// closing a channel that is already closed, is a no-op and returns
    /// `Ok`. The channel reaches `closed` when the bridge answers or the
    /// connection goes away.
    pub fn close(&self, problem: Option<Problem>) -> Result<()> {
        self.mux.lock().close_channel(&self.id, problem)
    }
}

// ============================================================================
// Channel - Receiving
// ============================================================================

impl Channel {
    /// Receives the next event.
    ///
    /// Returns `None` after the [`ChannelEvent::Close`] event was read.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.terminated && self.backlog.is_empty() {
            return None;
        }
        let event = match self.backlog.pop_front() {
            Some(event) => event,
            None => self.events.recv().await?,
        };
        self.observe(&event);
        Some(event)
    }

    /// Receives an event if one is available.
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        if self.terminated && self.backlog.is_empty() {
            return None;
        }
        let event = match self.backlog.pop_front() {
            Some(event) => event,
            None => self.events.try_recv().ok()?,
        };
        self.observe(&event);
        Some(event)
    }

    /// Waits until the bridge accepts the channel.
    ///
    /// Events that arrive meanwhile, `ready` included, stay queued for
    /// [`recv`](Self::recv).
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelFailed`] if the channel closed with a problem
    /// - [`Error::InvalidState`] if it closed cleanly before `ready`
    /// - [`Error::ConnectionClosed`] if the connection went away
    pub async fn wait_ready(&mut self) -> Result<()> {
        for event in &self.backlog {
            if let Some(outcome) = self.readiness(event) {
                return outcome;
            }
        }

        loop {
            let event = self.events.recv().await.ok_or(Error::ConnectionClosed)?;
            let outcome = self.readiness(&event);
            self.backlog.push_back(event);
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    fn readiness(&self, event: &ChannelEvent) -> Option<Result<()>> {
        match event {
            ChannelEvent::Control(Control::Ready { .. }) => Some(Ok(())),
            ChannelEvent::Close(info) => Some(Err(match &info.problem {
                Some(problem) => {
                    Error::channel_failed(self.id.clone(), problem.clone(), info.message.clone())
                }
                None => Error::invalid_state(self.id.clone(), ChannelState::Closed),
            })),
            _ => None,
        }
    }

    fn observe(&mut self, event: &ChannelEvent) {
        if event.is_close() {
            self.terminated = true;
        }
    }
}

// ============================================================================
// Drop
// ============================================================================

impl Drop for Channel {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        let mut mux = self.mux.lock();
        if mux.channel_state(&self.id).is_closing_or_closed() {
            return;
        }
        debug!(channel = %self.id, "Channel dropped while open, closing");
        let _ = mux.close_channel(&self.id, None);
    }
}
