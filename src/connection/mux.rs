//! Connection multiplexer.
//!
//! The multiplexer is the connection's state machine. It never touches
//! the transport: inbound messages are fed in by the event loop, and
//! everything it wants written goes out as [`ConnectionCommand`]s on an
//! unbounded queue the event loop drains in order.
//!
//! # Inbound
//!
//! ```text
//! WireMessage ─► decode ─► handshake? ─► filters ─► frame prefix? ─► relay to frame
//!                                                       │
//!                                                       └─► control dispatch / channel data
//! ```
//!
//! # Outbound
//!
//! ```text
//! send/close ─► fence gate ─► held until ready ─► congestion window ─► ConnectionCommand::Write
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde_json::Map;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::channel::registry::{ChannelEntry, Registry};
use crate::channel::{ChannelEvent, ChannelOptions, ChannelState, CloseInfo};
use crate::error::{Error, Result};
use crate::flow::{CongestionController, FenceCoordinator, Outbound};
use crate::identifiers::{ChannelId, in_prefix};
use crate::protocol::frame::{decode_base64, encode_base64};
use crate::protocol::{
    Control, Frame, Init, PROTOCOL_VERSION, Payload, Problem, WireMessage, decode, encode,
    encode_control,
};
use crate::transport::RelayMessage;

use super::ConnectionState;

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the connection-scoped control broadcast.
const CONTROL_BUS_CAPACITY: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// Instructions for the event loop.
#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    /// Write a message to the transport.
    Write(WireMessage),
    /// Close the transport and stop.
    Shutdown,
}

/// Inbound message as seen by a [`MessageFilter`].
#[derive(Debug, Clone, Copy)]
pub enum InboundMessage<'a> {
    /// Control message.
    Control(&'a Control),
    /// Channel data, as it arrived on the wire.
    Data {
        /// Channel id.
        channel: &'a str,
        /// Payload, base64 text not yet decoded.
        payload: &'a Payload,
    },
}

/// Inbound message filter.
///
/// Returning `false` drops the message before routing. Filters run on the
/// connection's event loop and must not call back into the connection.
pub type MessageFilter = Box<dyn Fn(&InboundMessage<'_>) -> bool + Send + Sync>;

/// Handshake outcome delivered to `Connection::establish`.
pub(crate) type HandshakeResult = Result<Arc<Init>>;

/// Multiplexer settings fixed at connect time.
#[derive(Debug, Clone)]
pub(crate) struct MuxConfig {
    /// Congestion window per channel in bytes.
    pub window: u64,
    /// Transport carries binary messages natively.
    pub binary_frames: bool,
    /// Origin stamped on relay envelopes sent to frames.
    pub origin: String,
}

/// A nested frame attached to this connection.
#[derive(Debug)]
struct ChildFrame {
    prefix: String,
    to_child: mpsc::UnboundedSender<RelayMessage>,
    initialized: bool,
    /// Channels the frame opened, with their binary flag.
    channels: FxHashMap<ChannelId, bool>,
}

impl ChildFrame {
    fn owns(&self, channel: &str) -> bool {
        in_prefix(channel, &self.prefix)
    }
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Connection state shared between the event loop and the handles.
pub(crate) struct Multiplexer {
    state: ConnectionState,
    config: MuxConfig,
    init: Option<Arc<Init>>,
    registry: Registry,
    congestion: CongestionController,
    fence: FenceCoordinator,
    /// Opens awaiting `ready`, with the time they were issued.
    pending: FxHashMap<ChannelId, Instant>,
    frames: FxHashMap<u64, ChildFrame>,
    next_frame: u64,
    filters: Vec<MessageFilter>,
    out: mpsc::UnboundedSender<ConnectionCommand>,
    control_bus: broadcast::Sender<Control>,
    state_tx: watch::Sender<ConnectionState>,
    handshake: Option<oneshot::Sender<HandshakeResult>>,
}

impl Multiplexer {
    /// Creates a multiplexer and queues the client `init`.
    pub fn new(
        config: MuxConfig,
        out: mpsc::UnboundedSender<ConnectionCommand>,
    ) -> (
        Self,
        oneshot::Receiver<HandshakeResult>,
        watch::Receiver<ConnectionState>,
    ) {
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (control_bus, _) = broadcast::channel(CONTROL_BUS_CAPACITY);

        let mux = Self {
            state: ConnectionState::Connecting,
            congestion: CongestionController::new(config.window),
            config,
            init: None,
            registry: Registry::new(""),
            fence: FenceCoordinator::new(),
            pending: FxHashMap::default(),
            frames: FxHashMap::default(),
            next_frame: 0,
            filters: Vec::new(),
            out,
            control_bus,
            state_tx,
            handshake: Some(handshake_tx),
        };
        mux.write_control(&Control::client_init());

        (mux, handshake_rx, state_rx)
    }
}

// ============================================================================
// Multiplexer - Accessors
// ============================================================================

impl Multiplexer {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The bridge's `init`, once received.
    pub fn init(&self) -> Option<Arc<Init>> {
        self.init.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Control> {
        self.control_bus.subscribe()
    }

    pub fn channel_count(&self) -> usize {
        self.registry.len()
    }

    /// Opens still waiting for `ready`.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Channel state; removed channels report `closed`.
    pub fn channel_state(&self, id: &ChannelId) -> ChannelState {
        self.registry
            .get(id.as_str())
            .map_or(ChannelState::Closed, |entry| entry.state)
    }

    pub fn add_filter(&mut self, filter: MessageFilter) {
        self.filters.push(filter);
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Open => Ok(()),
            _ => Err(Error::ConnectionClosed),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

// ============================================================================
// Multiplexer - Outbound
// ============================================================================

impl Multiplexer {
    /// Opens a channel and returns its id and event stream.
    pub fn open(
        &mut self,
        options: &ChannelOptions,
    ) -> Result<(ChannelId, mpsc::UnboundedReceiver<ChannelEvent>)> {
        self.ensure_open()?;

        let is_fence = options.is_fence();
        if is_fence && let Some(fence) = self.fence.active() {
            return Err(Error::fence_active(fence.clone()));
        }

        let id = self.registry.allocate();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.registry
            .insert(id.clone(), ChannelEntry::new(options.binary, events_tx));

        if is_fence {
            self.fence.begin(&id)?;
        } else {
            self.fence.admit(&id);
        }

        self.pending.insert(id.clone(), Instant::now());
        debug!(
            channel = %id,
            payload = %options.payload,
            binary = options.binary,
            fence = is_fence,
            "Opening channel"
        );

        let open = Control::open(id.clone(), options.clone());
        self.dispatch(id.clone(), Outbound::Control(open));

        Ok((id, events_rx))
    }

    /// Queues data on a channel.
    pub fn send(&mut self, id: &ChannelId, payload: Payload) -> Result<()> {
        let entry = self.writable(id)?;

        match (&payload, entry.binary) {
            (Payload::Text(_), true) => {
                return Err(Error::invalid_argument(format!(
                    "channel {id} is binary, text payload given"
                )));
            }
            (Payload::Binary(_), false) => {
                return Err(Error::invalid_argument(format!(
                    "channel {id} is text, binary payload given"
                )));
            }
            _ => {}
        }

        self.dispatch(id.clone(), Outbound::Data(payload));
        Ok(())
    }

    /// Queues a control message addressed to a channel.
    pub fn channel_control(&mut self, id: &ChannelId, control: Control) -> Result<()> {
        if control.is_open() {
            return Err(Error::invalid_argument("channels are opened with Connection::open"));
        }
        let control = control.scoped_to(id)?;

        if let Control::Close { problem, .. } = control {
            return self.close_channel(id, problem);
        }

        self.writable(id)?;
        self.dispatch(id.clone(), Outbound::Control(control));
        Ok(())
    }

    /// Requests close of a channel. Idempotent.
    pub fn close_channel(&mut self, id: &ChannelId, problem: Option<Problem>) -> Result<()> {
        let Some(entry) = self.registry.get_mut(id.as_str()) else {
            return Ok(());
        };
        if entry.state.is_closing_or_closed() {
            return Ok(());
        }
        entry.state = ChannelState::Closing;

        debug!(channel = %id, problem = ?problem, "Closing channel");
        self.dispatch(id.clone(), Outbound::Control(Control::close(id.clone(), problem)));
        Ok(())
    }

    /// Sends a connection-scoped control message.
    pub fn send_control(&mut self, control: &Control) -> Result<()> {
        self.ensure_open()?;

        if control.channel().is_some() {
            return Err(Error::invalid_argument(
                "channel control messages are sent through the channel",
            ));
        }
        if matches!(control, Control::Init(_) | Control::Open { .. }) {
            return Err(Error::invalid_argument(format!(
                "{} cannot be sent on an established connection",
                control.command()
            )));
        }

        self.write_control(control);
        Ok(())
    }

    fn writable(&self, id: &ChannelId) -> Result<&ChannelEntry> {
        let entry = self
            .registry
            .get(id.as_str())
            .ok_or_else(|| Error::invalid_state(id.clone(), ChannelState::Closed))?;
        if entry.state.is_closing_or_closed() {
            return Err(Error::invalid_state(id.clone(), entry.state));
        }
        Ok(entry)
    }

    /// Entry point of the outbound pipeline.
    fn dispatch(&mut self, id: ChannelId, item: Outbound) {
        if self.fence.is_gated(&id) {
            trace!(channel = %id, "Held behind fence");
            self.fence.hold(id, item);
            return;
        }
        self.route(id, item);
    }

    /// Past the fence: hold until `ready`, then pace by the window.
    fn route(&mut self, id: ChannelId, item: Outbound) {
        if item.is_open() {
            self.transmit(&id, item);
            return;
        }

        if let Some(entry) = self.registry.get_mut(id.as_str())
            && !entry.accepted
        {
            entry.held.push_back(item);
            return;
        }

        if let Some(item) = self.congestion.submit(&id, item) {
            self.transmit(&id, item);
        }
    }

    fn transmit(&mut self, id: &ChannelId, item: Outbound) {
        match item {
            Outbound::Data(payload) => {
                trace!(channel = %id, bytes = payload.len(), "Sending data");
                let message = encode(id.as_str(), &payload, self.config.binary_frames);
                self.write(message);
            }
            Outbound::Control(control) => {
                if control.is_open()
                    && let Some(entry) = self.registry.get_mut(id.as_str())
                    && entry.state == ChannelState::Init
                {
                    entry.state = ChannelState::Open;
                }
                self.write_control(&control);
            }
        }
    }

    fn write(&self, message: WireMessage) {
        if self.out.send(ConnectionCommand::Write(message)).is_err() {
            trace!("Event loop gone, write discarded");
        }
    }

    fn write_control(&self, control: &Control) {
        match encode_control(control) {
            Ok(message) => self.write(message),
            Err(e) => warn!(error = %e, command = control.command(), "Failed to encode control"),
        }
    }
}

// ============================================================================
// Multiplexer - Inbound
// ============================================================================

impl Multiplexer {
    /// Handles one message from the transport.
    pub fn handle_inbound(&mut self, message: WireMessage) {
        if self.state == ConnectionState::Closed {
            trace!("Connection closed, inbound message dropped");
            return;
        }

        let frame = match decode(message) {
            Ok(frame) => frame,
            Err(e) if self.state == ConnectionState::Connecting => {
                return self.protocol_violation(format!("expected init: {e}"));
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed message");
                return;
            }
        };

        if self.state == ConnectionState::Connecting {
            self.handshake(&frame);
            return;
        }

        if frame.is_control() {
            let control = match frame.control() {
                Ok(control) => control,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed control message");
                    return;
                }
            };
            if !self.admit(&InboundMessage::Control(&control)) {
                trace!(command = control.command(), "Control message filtered");
                return;
            }
            if let Some(key) = control.channel().and_then(|channel| self.frame_for(channel)) {
                self.relay_control_to_child(key, &control);
                return;
            }
            self.dispatch_control(control);
        } else {
            let message = InboundMessage::Data {
                channel: &frame.channel,
                payload: &frame.payload,
            };
            if !self.admit(&message) {
                trace!(channel = %frame.channel, "Data filtered");
                return;
            }
            if let Some(key) = self.frame_for(&frame.channel) {
                self.relay_data_to_child(key, frame);
                return;
            }
            self.dispatch_data(frame);
        }
    }

    fn admit(&self, message: &InboundMessage<'_>) -> bool {
        self.filters.iter().all(|filter| filter(message))
    }

    fn handshake(&mut self, frame: &Frame) {
        let init = match frame.control() {
            Ok(Control::Init(init)) => init,
            Ok(other) => {
                return self.protocol_violation(format!(
                    "expected init, received {}",
                    other.command()
                ));
            }
            Err(e) => return self.protocol_violation(format!("expected init: {e}")),
        };

        if init.version != PROTOCOL_VERSION {
            return self.protocol_violation(format!(
                "unsupported protocol version {}",
                init.version
            ));
        }

        self.registry
            .reseed(init.channel_seed.clone().unwrap_or_default());
        let init = Arc::new(init);
        self.init = Some(Arc::clone(&init));
        self.set_state(ConnectionState::Open);

        info!(
            host = ?init.host,
            seed = ?init.channel_seed,
            "Bridge handshake complete"
        );

        if let Some(tx) = self.handshake.take() {
            let _ = tx.send(Ok(Arc::clone(&init)));
        }
        let _ = self.control_bus.send(Control::Init((*init).clone()));
    }

    fn protocol_violation(&mut self, message: String) {
        warn!(%message, "Protocol violation during handshake");

        self.write_control(&Control::Close {
            channel: None,
            problem: Some(Problem::ProtocolError),
            message: Some(message.clone()),
            fields: Map::new(),
        });
        if let Some(tx) = self.handshake.take() {
            let _ = tx.send(Err(Error::protocol(message)));
        }
        self.teardown(Problem::ProtocolError);
    }

    fn dispatch_control(&mut self, control: Control) {
        match control {
            Control::Init(init) => self.on_reinit(init),
            ping @ Control::Ping { .. } => {
                if let Some(pong) = ping.pong_for() {
                    self.write_control(&pong);
                }
            }
            Control::Ack { channel, bytes } => {
                for item in self.congestion.acknowledge(&channel, bytes) {
                    self.transmit(&channel, item);
                }
            }
            Control::Ready { channel, fields } => self.on_ready(channel, fields),
            Control::Done { channel } => self.on_done(channel),
            Control::Close {
                channel: Some(channel),
                problem,
                message,
                fields,
            } => self.on_close(
                channel,
                CloseInfo {
                    problem,
                    message,
                    fields,
                },
            ),
            close @ Control::Close { channel: None, .. } => self.on_connection_close(close),
            Control::Open { channel, .. } => {
                warn!(channel = %channel, "Refusing bridge-initiated channel");
                self.write_control(&Control::close(channel, Some(Problem::NotSupported)));
            }
            other => match other.channel().map(ChannelId::from) {
                Some(channel) => self.deliver(&channel, other),
                None => {
                    trace!(command = other.command(), "Connection control message");
                    let _ = self.control_bus.send(other);
                }
            },
        }
    }

    fn on_reinit(&mut self, init: Init) {
        if init.version != PROTOCOL_VERSION {
            warn!(version = init.version, "Ignoring init with unsupported version");
            return;
        }
        debug!("Bridge sent updated init");
        let init = Arc::new(init);
        self.init = Some(Arc::clone(&init));
        let _ = self.control_bus.send(Control::Init((*init).clone()));
    }

    fn on_ready(&mut self, id: ChannelId, fields: Map<String, serde_json::Value>) {
        let Some(entry) = self.registry.get_mut(id.as_str()) else {
            debug!(channel = %id, "Ready for unknown channel");
            return;
        };

        entry.accepted = true;
        if matches!(entry.state, ChannelState::Init | ChannelState::Open) {
            entry.state = ChannelState::Ready;
        }
        let held: Vec<_> = entry.held.drain(..).collect();
        entry.emit(ChannelEvent::Control(Control::Ready {
            channel: id.clone(),
            fields,
        }));

        if let Some(issued) = self.pending.remove(&id) {
            debug!(
                channel = %id,
                elapsed_ms = issued.elapsed().as_millis() as u64,
                flushed = held.len(),
                "Channel ready"
            );
        }

        for item in held {
            self.route(id.clone(), item);
        }
    }

    fn on_done(&mut self, id: ChannelId) {
        match self.registry.get(id.as_str()) {
            Some(entry) => entry.emit(ChannelEvent::Control(Control::done(id.clone()))),
            None => debug!(channel = %id, "Done for unknown channel"),
        }
        self.complete_fence(&id, None);
    }

    fn on_close(&mut self, id: ChannelId, info: CloseInfo) {
        let Some(entry) = self.registry.remove(id.as_str()) else {
            debug!(channel = %id, "Close for unknown channel");
            return;
        };

        let discarded = self.congestion.remove(&id);
        let issued = self.pending.remove(&id);
        debug!(
            channel = %id,
            problem = ?info.problem,
            before_ready = issued.is_some(),
            discarded,
            "Channel closed"
        );

        entry.emit(ChannelEvent::Control(Control::Close {
            channel: Some(id.clone()),
            problem: info.problem.clone(),
            message: info.message.clone(),
            fields: info.fields.clone(),
        }));
        let problem = info.problem.clone();
        entry.emit(ChannelEvent::Close(info));

        self.complete_fence(&id, problem.as_ref());
    }

    fn on_connection_close(&mut self, close: Control) {
        let problem = match &close {
            Control::Close { problem, .. } => problem.clone(),
            _ => None,
        };
        info!(problem = ?problem, "Bridge closed the connection");
        let _ = self.control_bus.send(close);
        self.teardown(problem.unwrap_or(Problem::Disconnected));
    }

    fn complete_fence(&mut self, id: &ChannelId, problem: Option<&Problem>) {
        let Some(released) = self.fence.complete(id) else {
            return;
        };
        if let Some(problem) = problem {
            warn!(
                channel = %id,
                problem = %problem,
                released = released.len(),
                "Fence failed, releasing held traffic"
            );
        }
        for (channel, item) in released {
            self.route(channel, item);
        }
    }

    fn deliver(&self, id: &ChannelId, control: Control) {
        match self.registry.get(id.as_str()) {
            Some(entry) => entry.emit(ChannelEvent::Control(control)),
            None => debug!(
                channel = %id,
                command = control.command(),
                "Control for unknown channel"
            ),
        }
    }

    fn dispatch_data(&mut self, frame: Frame) {
        let Some(entry) = self.registry.get(&frame.channel) else {
            debug!(channel = %frame.channel, "Dropping data for unknown channel");
            return;
        };

        let payload = match (entry.binary, frame.payload) {
            (true, Payload::Text(text)) if self.config.binary_frames => {
                Payload::Binary(text.into_bytes())
            }
            (true, Payload::Text(text)) => match decode_base64(&text) {
                Ok(bytes) => Payload::Binary(bytes),
                Err(e) => {
                    warn!(channel = %frame.channel, error = %e, "Dropping undecodable binary data");
                    return;
                }
            },
            (false, Payload::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Payload::Text(text),
                Err(_) => {
                    warn!(channel = %frame.channel, "Dropping non UTF-8 data on text channel");
                    return;
                }
            },
            (_, payload) => payload,
        };

        entry.emit(ChannelEvent::Message(payload));
    }
}

// ============================================================================
// Multiplexer - Teardown
// ============================================================================

impl Multiplexer {
    /// Closes the connection and every channel on it. Idempotent.
    pub fn teardown(&mut self, problem: Problem) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closed);

        if let Some(tx) = self.handshake.take() {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        let channels = self.registry.drain();
        let count = channels.len();
        for (id, entry) in channels {
            entry.emit(ChannelEvent::Control(Control::close(
                id,
                Some(problem.clone()),
            )));
            entry.emit(ChannelEvent::Close(CloseInfo::with_problem(problem.clone())));
        }

        self.pending.clear();
        self.congestion.clear();
        self.fence.clear();
        self.frames.clear();

        let _ = self.out.send(ConnectionCommand::Shutdown);
        info!(problem = %problem, channels = count, "Connection closed");
    }
}

// ============================================================================
// Multiplexer - Frame relay
// ============================================================================

impl Multiplexer {
    /// Attaches a nested frame and sends it a synthesized `init`.
    pub fn attach_frame(&mut self, to_child: mpsc::UnboundedSender<RelayMessage>) -> Result<u64> {
        self.ensure_open()?;
        let bridge = self.init.clone().ok_or(Error::ConnectionClosed)?;

        let prefix = self.registry.allocate_prefix();
        let key = self.next_frame;
        self.next_frame += 1;

        let mut init = Init::new(PROTOCOL_VERSION);
        init.channel_seed = Some(prefix.clone());
        init.host = bridge.host.clone();
        init.csrf_token = bridge.csrf_token.clone();
        init.capabilities = bridge.capabilities.clone();

        debug!(%prefix, key, "Frame attached");
        self.frames.insert(
            key,
            ChildFrame {
                prefix,
                to_child,
                initialized: false,
                channels: FxHashMap::default(),
            },
        );
        self.post_control(key, &Control::Init(init));

        Ok(key)
    }

    /// Detaches a frame, closing the channels it left open.
    pub fn detach_frame(&mut self, key: u64) {
        let Some(child) = self.frames.remove(&key) else {
            return;
        };
        debug!(prefix = %child.prefix, open = child.channels.len(), "Frame detached");

        if self.state != ConnectionState::Open {
            return;
        }
        for channel in child.channels.into_keys() {
            self.write_control(&Control::close(channel, Some(Problem::Terminated)));
        }
    }

    /// Handles a wire message relayed up from a frame.
    pub fn relay_from_child(&mut self, key: u64, data: String) {
        if self.state != ConnectionState::Open {
            return;
        }
        let frame = match decode(WireMessage::Text(data)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed message from frame");
                return;
            }
        };
        let Some(child) = self.frames.get_mut(&key) else {
            return;
        };

        if !frame.is_control() {
            if !child.initialized {
                self.reject_frame(key, "frame sent data before init".to_owned());
                return;
            }
            if !child.owns(&frame.channel) {
                warn!(
                    channel = %frame.channel,
                    prefix = %child.prefix,
                    "Dropping frame data outside its prefix"
                );
                return;
            }
            let binary = child
                .channels
                .get(frame.channel.as_str())
                .copied()
                .unwrap_or(false);
            let message = match frame.payload {
                Payload::Text(text) if binary && self.config.binary_frames => {
                    match decode_base64(&text) {
                        Ok(bytes) => encode(&frame.channel, &Payload::Binary(bytes), true),
                        Err(e) => {
                            warn!(channel = %frame.channel, error = %e, "Dropping undecodable frame data");
                            return;
                        }
                    }
                }
                payload => encode(&frame.channel, &payload, false),
            };
            self.write(message);
            return;
        }

        let control = match frame.control() {
            Ok(control) => control,
            Err(e) => {
                warn!(error = %e, "Dropping malformed control from frame");
                return;
            }
        };

        if !child.initialized {
            if matches!(control, Control::Init(_)) {
                child.initialized = true;
                debug!(prefix = %child.prefix, "Frame initialized");
                return;
            }
            let message = format!("frame sent {} before init", control.command());
            self.reject_frame(key, message);
            return;
        }

        match control.channel() {
            Some(channel) if !child.owns(channel) => {
                warn!(
                    channel,
                    prefix = %child.prefix,
                    "Dropping frame control outside its prefix"
                );
                return;
            }
            Some(_) => match &control {
                Control::Open { channel, options } => {
                    child.channels.insert(channel.clone(), options.binary);
                }
                Control::Close {
                    channel: Some(channel),
                    ..
                } => {
                    child.channels.remove(channel);
                }
                _ => {}
            },
            None => {
                if matches!(control, Control::Init(_)) {
                    trace!(prefix = %child.prefix, "Ignoring repeated init from frame");
                    return;
                }
                if control.is_close() {
                    debug!(prefix = %child.prefix, "Frame closed its connection");
                    self.detach_frame(key);
                    return;
                }
            }
        }

        self.write_control(&control);
    }

    /// Closes a frame that broke the handshake.
    fn reject_frame(&mut self, key: u64, message: String) {
        if let Some(child) = self.frames.get(&key) {
            warn!(prefix = %child.prefix, %message, "Protocol violation from frame");
        }
        self.post_control(
            key,
            &Control::Close {
                channel: None,
                problem: Some(Problem::ProtocolError),
                message: Some(message),
                fields: Map::new(),
            },
        );
        self.frames.remove(&key);
    }

    fn frame_for(&self, channel: &str) -> Option<u64> {
        self.frames
            .iter()
            .find(|(_, child)| child.owns(channel))
            .map(|(key, _)| *key)
    }

    fn relay_control_to_child(&mut self, key: u64, control: &Control) {
        if let Control::Close {
            channel: Some(channel),
            ..
        } = control
            && let Some(child) = self.frames.get_mut(&key)
        {
            child.channels.remove(channel);
        }
        self.post_control(key, control);
    }

    fn relay_data_to_child(&mut self, key: u64, frame: Frame) {
        let text = match frame.payload {
            Payload::Text(text) => text,
            Payload::Binary(bytes) => encode_base64(&bytes),
        };
        if let WireMessage::Text(data) = encode(&frame.channel, &Payload::Text(text), false) {
            self.post(key, data);
        }
    }

    fn post_control(&mut self, key: u64, control: &Control) {
        match encode_control(control) {
            Ok(WireMessage::Text(data)) => self.post(key, data),
            Ok(WireMessage::Binary(_)) => {}
            Err(e) => warn!(error = %e, "Failed to encode control for frame"),
        }
    }

    fn post(&mut self, key: u64, data: String) {
        let Some(child) = self.frames.get(&key) else {
            return;
        };
        let message = RelayMessage {
            origin: self.config.origin.clone(),
            data,
        };
        if child.to_child.send(message).is_err() {
            debug!(prefix = %child.prefix, "Frame gone");
            self.detach_frame(key);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
