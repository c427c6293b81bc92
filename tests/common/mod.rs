//! In-process mock bridge.
//!
//! Speaks just enough of the protocol for the integration tests:
//!
//! | Payload | Behaviour |
//! |---------|-----------|
//! | `echo` | `ready`, echoes data, answers `done` with `done` |
//! | `null` | `ready`, swallows data |
//! | `stream` | `protocol-error` without `port`/`unix`, `not-found` for `127.0.0.99`, otherwise echo |
//! | other | `not-supported` |
//!
//! Every data frame is acknowledged, and every message received is
//! recorded in arrival order.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

use cockpit_transport::{Channel, ChannelEvent};

// ============================================================================
// Constants
// ============================================================================

/// Channel seed announced by the mock.
pub const SEED: &str = "1:";

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Mode
// ============================================================================

/// How the mock opens the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Sends a valid `init`.
    Normal,
    /// Sends a `ping` before anything else.
    NonInitFirst,
    /// Never sends `init`.
    Silent,
}

// ============================================================================
// MockBridge
// ============================================================================

type Writer = SplitSink<WebSocketStream<TcpStream>, Message>;

/// A bridge listening on a random local port, serving one connection.
pub struct MockBridge {
    url: String,
    received: Arc<Mutex<Vec<String>>>,
    disconnect: Arc<Notify>,
    peer_closed: Arc<Notify>,
}

impl MockBridge {
    pub async fn start(mode: Mode) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}/cockpit/socket", listener.local_addr()?);
        let received = Arc::new(Mutex::new(Vec::new()));
        let disconnect = Arc::new(Notify::new());
        let peer_closed = Arc::new(Notify::new());

        let log = Arc::clone(&received);
        let kill = Arc::clone(&disconnect);
        let ended = Arc::clone(&peer_closed);
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await
                && !matches!(serve(stream, mode, log, kill).await, Ok(false))
            {
                ended.notify_one();
            }
        });

        Ok(Self {
            url,
            received,
            disconnect,
            peer_closed,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Drops the socket from the bridge side.
    pub fn disconnect(&self) {
        self.disconnect.notify_one();
    }

    /// Waits until the client closes the socket.
    pub async fn wait_peer_closed(&self) -> bool {
        tokio::time::timeout(WAIT, self.peer_closed.notified())
            .await
            .is_ok()
    }

    /// Messages received so far; binary frames as `"<channel>\n<binary N>"`.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    /// Control messages received so far.
    pub fn controls(&self) -> Vec<Value> {
        self.received()
            .iter()
            .filter_map(|text| text.strip_prefix('\n'))
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect()
    }

    /// Waits until a received message satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl Fn(&str) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if self.received().iter().any(|text| predicate(text)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

// ============================================================================
// Serving
// ============================================================================

/// Returns `false` when the bridge side dropped the socket.
async fn serve(
    stream: TcpStream,
    mode: Mode,
    received: Arc<Mutex<Vec<String>>>,
    disconnect: Arc<Notify>,
) -> Result<bool> {
    let subprotocol = |_request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        response
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("cockpit1"));
        Ok(response)
    };
    let ws = accept_hdr_async(stream, subprotocol).await?;
    let (mut write, mut read) = ws.split();

    match mode {
        Mode::Normal => {
            send_control(
                &mut write,
                json!({
                    "command": "init",
                    "version": 1,
                    "channel-seed": SEED,
                    "host": "localhost",
                    "csrf-token": "token",
                    "capabilities": ["binary"],
                }),
            )
            .await?;
        }
        Mode::NonInitFirst => send_control(&mut write, json!({"command": "ping"})).await?,
        Mode::Silent => {}
    }

    let mut payloads: HashMap<String, String> = HashMap::new();

    loop {
        tokio::select! {
            _ = disconnect.notified() => {
                let _ = write.close().await;
                return Ok(false);
            }

            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let text = text.as_str().to_owned();
                        received.lock().push(text.clone());
                        handle_text(&mut write, &mut payloads, &text).await?;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let Some(split) = bytes.iter().position(|&b| b == b'\n') else {
                            continue;
                        };
                        let channel = String::from_utf8_lossy(&bytes[..split]).into_owned();
                        let length = bytes.len() - split - 1;
                        received.lock().push(format!("{channel}\n<binary {length}>"));
                        ack(&mut write, &channel, length).await?;
                        if echoes(&payloads, &channel) {
                            write.send(Message::Binary(bytes)).await?;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    Ok(true)
}

async fn handle_text(
    write: &mut Writer,
    payloads: &mut HashMap<String, String>,
    text: &str,
) -> Result<()> {
    let Some((channel, payload)) = text.split_once('\n') else {
        return Ok(());
    };

    if !channel.is_empty() {
        ack(write, channel, payload.len()).await?;
        if echoes(payloads, channel) {
            write.send(Message::Text(text.to_owned().into())).await?;
        }
        return Ok(());
    }

    let control: Value = serde_json::from_str(payload)?;
    let command = control["command"].as_str().unwrap_or_default();
    let channel = control["channel"].as_str().unwrap_or_default().to_owned();

    match command {
        "open" => {
            let kind = control["payload"].as_str().unwrap_or_default();
            let refusal = match kind {
                "echo" | "null" => None,
                "stream" if control.get("port").is_none() && control.get("unix").is_none() => {
                    Some("protocol-error")
                }
                "stream" if control["address"] == "127.0.0.99" => Some("not-found"),
                "stream" => None,
                _ => Some("not-supported"),
            };
            match refusal {
                Some(problem) => {
                    send_control(
                        write,
                        json!({"command": "close", "channel": channel, "problem": problem}),
                    )
                    .await?;
                }
                None => {
                    payloads.insert(channel.clone(), kind.to_owned());
                    send_control(write, json!({"command": "ready", "channel": channel})).await?;
                }
            }
        }
        "done" => {
            send_control(write, json!({"command": "done", "channel": channel})).await?;
        }
        "close" if !channel.is_empty() => {
            payloads.remove(&channel);
            send_control(write, json!({"command": "close", "channel": channel})).await?;
        }
        "ping" => {
            let mut pong = control.clone();
            pong["command"] = json!("pong");
            send_control(write, pong).await?;
        }
        _ => {}
    }

    Ok(())
}

fn echoes(payloads: &HashMap<String, String>, channel: &str) -> bool {
    matches!(payloads.get(channel).map(String::as_str), Some("echo" | "stream"))
}

async fn ack(write: &mut Writer, channel: &str, bytes: usize) -> Result<()> {
    send_control(
        write,
        json!({"command": "ack", "channel": channel, "bytes": bytes}),
    )
    .await
}

async fn send_control(write: &mut Writer, control: Value) -> Result<()> {
    write
        .send(Message::Text(format!("\n{control}").into()))
        .await?;
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Receives the next event or fails after [`WAIT`].
pub async fn next_event(channel: &mut Channel) -> Result<ChannelEvent> {
    tokio::time::timeout(WAIT, channel.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("channel event stream ended"))
}

/// Receives events up to and including the terminal close.
pub async fn events_until_close(channel: &mut Channel) -> Result<Vec<ChannelEvent>> {
    let mut events = Vec::new();
    loop {
        let event = next_event(channel).await?;
        let done = event.is_close();
        events.push(event);
        if done {
            return Ok(events);
        }
    }
}
