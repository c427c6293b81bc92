//! Connection handle and event loop.
//!
//! # Event Loop
//!
//! Each connection spawns one tokio task that handles:
//!
//! - Inbound messages from the transport, fed to the multiplexer
//! - Outbound writes queued by the multiplexer, in issue order
//! - Shutdown, after which every channel is closed with `disconnected`

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::channel::{Channel, ChannelOptions};
use crate::error::{Error, Result};
use crate::protocol::{Control, Init, Problem};
use crate::transport::relay::{self, FramePort};
use crate::transport::{RelayMessage, RelayTransport, Transport, TransportSink, TransportStream};

use super::ConnectionState;
use super::builder::{ConnectionBuilder, ConnectionConfig};
use super::mux::{ConnectionCommand, MessageFilter, Multiplexer, MuxConfig};

// ============================================================================
// Constants
// ============================================================================

/// Origin used when neither the builder nor the transport names one.
const NULL_ORIGIN: &str = "null";

// ============================================================================
// Connection
// ============================================================================

/// Connection to a bridge.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; clones share the
/// same transport. All operations are non-blocking.
#[derive(Clone)]
pub struct Connection {
    /// Multiplexer (shared with the event loop).
    mux: Arc<Mutex<Multiplexer>>,
    /// Connection state updates.
    state_rx: watch::Receiver<ConnectionState>,
    /// The bridge's `init`.
    init: Arc<Init>,
    /// Origin of this end.
    origin: String,
    /// Shared with every handle; the last one dropped closes the connection.
    guard: Arc<HandleGuard>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("host", &self.init.host)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Connects to `url` with default settings.
    ///
    /// # Errors
    ///
    /// See [`ConnectionBuilder::connect`].
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        ConnectionBuilder::new().url(url).connect().await
    }

    /// Spawns the event loop over `transport` and waits for the handshake.
    pub(crate) async fn establish(
        transport: Box<dyn Transport>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let origin = config
            .origin
            .or_else(|| transport.origin())
            .unwrap_or_else(|| NULL_ORIGIN.to_owned());

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (mux, handshake_rx, state_rx) = Multiplexer::new(
            MuxConfig {
                window: config.window,
                binary_frames: transport.supports_binary(),
                origin: origin.clone(),
            },
            command_tx,
        );
        let mux = Arc::new(Mutex::new(mux));

        let (sink, stream) = transport.split();
        tokio::spawn(run_event_loop(sink, stream, command_rx, Arc::clone(&mux)));

        let init = match timeout(config.init_timeout, handshake_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_) => {
                warn!(
                    timeout_ms = config.init_timeout.as_millis() as u64,
                    "Bridge did not send init in time"
                );
                mux.lock().teardown(Problem::Timeout);
                return Err(Error::connection_timeout(
                    config.init_timeout.as_millis() as u64
                ));
            }
        };

        Ok(Self {
            guard: Arc::new(HandleGuard {
                mux: Arc::downgrade(&mux),
            }),
            mux,
            state_rx,
            init,
            origin,
        })
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the bridge's `init` message.
    #[inline]
    #[must_use]
    pub fn init(&self) -> &Init {
        &self.init
    }

    /// Returns the latest `init`, including updates sent after the
    /// handshake.
    #[must_use]
    pub fn current_init(&self) -> Arc<Init> {
        self.mux
            .lock()
            .init()
            .unwrap_or_else(|| Arc::clone(&self.init))
    }

    /// Returns the default host announced by the bridge.
    #[inline]
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.init.host.as_deref()
    }

    /// Returns the CSRF token announced by the bridge.
    #[inline]
    #[must_use]
    pub fn csrf_token(&self) -> Option<&str> {
        self.init.csrf_token.as_deref()
    }

    /// Returns the origin this end identifies as.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Returns `true` until the connection closes.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns the number of live channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.mux.lock().channel_count()
    }

    /// Returns the number of channels not yet accepted by the bridge.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.mux.lock().pending_count()
    }
}

// ============================================================================
// Connection - Channels
// ============================================================================

impl Connection {
    /// Opens a channel.
    ///
    /// Returns immediately; the bridge accepts the channel with `ready` or
    /// refuses it with a `close` event. See [`Channel::wait_ready`].
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::FenceActive`] when opening a fence while another is pending
    pub fn open(&self, options: ChannelOptions) -> Result<Channel> {
        let (id, events) = self.mux.lock().open(&options)?;
        Ok(Channel::new(
            id,
            options,
            Arc::clone(&self.mux),
            Arc::clone(&self.guard),
            events,
        ))
    }

    /// Sends a connection-scoped control message (`logout`, `authorize`, ...).
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::InvalidArgument`] for channel-scoped commands, `init` and `open`
    pub fn control(&self, control: &Control) -> Result<()> {
        self.mux.lock().send_control(control)
    }

    /// Subscribes to connection-scoped control messages.
    ///
    /// Receives `init` updates, `authorize`, `logout`, unknown commands
    /// without a channel, and the bridge's connection `close`.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Control> {
        self.mux.lock().subscribe()
    }

    /// Installs an inbound message filter.
    ///
    /// Filters run in installation order before routing; any returning
    /// `false` drops the message.
    pub fn add_filter(&self, filter: MessageFilter) {
        self.mux.lock().add_filter(filter);
    }
}

// ============================================================================
// Connection - Frames
// ============================================================================

impl Connection {
    /// Attaches a nested frame.
    ///
    /// Returns the frame's transport; connect it with
    /// [`ConnectionBuilder::connect_with`]. The frame is sent an `init`
    /// with its own channel prefix and may then use channels under that
    /// prefix only. Envelopes from an origin other than `child_origin`
    /// are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection is closed.
    pub fn attach_frame(&self, child_origin: impl Into<String>) -> Result<RelayTransport> {
        let child_origin = child_origin.into();
        let (port, transport) = relay::pair(self.origin.clone(), child_origin.clone());
        let FramePort {
            to_child,
            from_child,
        } = port;

        let key = self.mux.lock().attach_frame(to_child)?;
        tokio::spawn(forward_from_frame(
            Arc::clone(&self.mux),
            key,
            child_origin,
            from_child,
        ));

        Ok(transport)
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Closes the connection.
    ///
    /// Every open channel receives a `close` event with `problem`.
    pub fn close(&self, problem: Option<Problem>) {
        self.mux
            .lock()
            .teardown(problem.unwrap_or(Problem::Disconnected));
    }

    /// Waits until the connection is closed.
    pub async fn closed(&self) {
        let mut state_rx = self.state_rx.clone();
        let _ = state_rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}

// ============================================================================
// HandleGuard
// ============================================================================

/// Tears the connection down when dropped.
///
/// Held by [`Connection`] clones and [`Channel`]s; the event loop only
/// keeps the multiplexer alive, never the guard.
pub(crate) struct HandleGuard {
    mux: Weak<Mutex<Multiplexer>>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let Some(mux) = self.mux.upgrade() else {
            return;
        };
        let mut mux = mux.lock();
        if mux.state() != ConnectionState::Closed {
            debug!("Last connection handle dropped, closing");
            mux.teardown(Problem::Disconnected);
        }
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Event loop that handles transport I/O.
async fn run_event_loop(
    mut sink: Box<dyn TransportSink>,
    mut stream: Box<dyn TransportStream>,
    mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    mux: Arc<Mutex<Multiplexer>>,
) {
    loop {
        tokio::select! {
            // Inbound messages from the bridge
            message = stream.recv() => {
                match message {
                    Some(Ok(message)) => mux.lock().handle_inbound(message),

                    Some(Err(e)) => {
                        error!(error = %e, "Transport error");
                        break;
                    }

                    None => {
                        debug!("Transport stream ended");
                        break;
                    }
                }
            }

            // Writes queued by the multiplexer
            command = command_rx.recv() => {
                match command {
                    Some(ConnectionCommand::Write(message)) => {
                        trace!(bytes = message.len(), "Writing message");
                        if let Err(e) = sink.send(message).await {
                            error!(error = %e, "Failed to write to transport");
                            break;
                        }
                    }

                    Some(ConnectionCommand::Shutdown) => {
                        debug!("Shutdown command received");
                        let _ = sink.close().await;
                        break;
                    }

                    None => {
                        debug!("Command channel closed");
                        break;
                    }
                }
            }
        }
    }

    mux.lock().teardown(Problem::Disconnected);

    debug!("Event loop terminated");
}

/// Feeds envelopes from a nested frame into the multiplexer.
async fn forward_from_frame(
    mux: Arc<Mutex<Multiplexer>>,
    key: u64,
    origin: String,
    mut from_child: mpsc::UnboundedReceiver<RelayMessage>,
) {
    while let Some(message) = from_child.recv().await {
        if message.origin != origin {
            warn!(
                origin = %message.origin,
                expected = %origin,
                "Dropping frame message from unexpected origin"
            );
            continue;
        }
        mux.lock().relay_from_child(key, message.data);
    }

    mux.lock().detach_frame(key);
    debug!(key, "Frame relay terminated");
}

// ============================================================================
// Tests
// ============================================================================
