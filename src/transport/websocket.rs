//! WebSocket transport.
//!
//! Connects to the bridge's socket endpoint with the `cockpit1`
//! subprotocol. Text frames map to [`WireMessage::Text`], binary frames
//! to [`WireMessage::Binary`]; ping/pong frames are handled by
//! tungstenite and never surface.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::WireMessage;

use super::{Transport, TransportSink, TransportStream};

// ============================================================================
// Constants
// ============================================================================

/// WebSocket subprotocol spoken by the bridge.
pub const SUBPROTOCOL: &str = "cockpit1";

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket connection to a bridge.
pub struct WebSocketTransport<S = MaybeTlsStream<TcpStream>> {
    stream: WebSocketStream<S>,
    origin: Option<String>,
}

impl WebSocketTransport {
    /// Connects to `url`, adding `headers` to the upgrade request.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the url or a header is invalid
    /// - [`Error::WebSocket`] if the upgrade fails
    pub async fn connect(
        url: &str,
        headers: &[(String, String)],
        origin: Option<String>,
    ) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::config(format!("invalid url {url}: {e}")))?;

        let request_headers = request.headers_mut();
        request_headers.insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SUBPROTOCOL),
        );
        if let Some(origin) = &origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|_| Error::config(format!("invalid origin {origin}")))?;
            request_headers.insert("Origin", value);
        }
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::config(format!("invalid header name {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::config(format!("invalid value for header {name}")))?;
            request_headers.insert(name, value);
        }

        debug!(url, "Connecting WebSocket");
        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| connect_error(url, e))?;
        debug!(status = %response.status(), "WebSocket connected");

        Ok(Self { stream, origin })
    }
}

/// Maps a failed upgrade to the crate error.
///
/// Socket failures surface as [`Error::Io`], a non-101 answer as
/// [`Error::Connection`]; anything else stays a WebSocket error.
fn connect_error(url: &str, error: WsError) -> Error {
    match error {
        WsError::Io(e) => e.into(),
        WsError::Http(response) => Error::connection(format!(
            "{url} answered {} instead of upgrading",
            response.status()
        )),
        other => other.into(),
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an established WebSocket stream.
    #[must_use]
    pub fn from_stream(stream: WebSocketStream<S>, origin: Option<String>) -> Self {
        Self { stream, origin }
    }
}

impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn supports_binary(&self) -> bool {
        true
    }

    fn origin(&self) -> Option<String> {
        self.origin.clone()
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportSink>, Box<dyn TransportStream>) {
        let (write, read) = self.stream.split();
        (
            Box::new(WebSocketSink { write }),
            Box::new(WebSocketReader { read }),
        )
    }
}

// ============================================================================
// Halves
// ============================================================================

struct WebSocketSink<S> {
    write: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> TransportSink for WebSocketSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let message = match message {
            WireMessage::Text(text) => Message::Text(text.into()),
            WireMessage::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.write.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.write.close().await?;
        Ok(())
    }
}

struct WebSocketReader<S> {
    read: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> TransportStream for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Option<Result<WireMessage>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(Ok(WireMessage::Text(text.as_str().to_owned())));
                }
                Ok(Message::Binary(bytes)) => return Some(Ok(WireMessage::Binary(bytes.to_vec()))),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by remote");
                    return None;
                }
                // Ping, Pong, raw frames
                Ok(_) => trace!("Ignoring WebSocket control frame"),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn refused(result: Result<WebSocketTransport>) -> Error {
        match result {
            Ok(_) => panic!("connection unexpectedly succeeded"),
            Err(e) => e,
        }
    }

    #[tokio::test]
    async fn test_refused_socket_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let url = format!("ws://{addr}/cockpit/socket");
        let err = refused(WebSocketTransport::connect(&url, &[], None).await);
        assert!(matches!(err, Error::Io(_)), "got {err}");
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_rejected_upgrade_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 403 Forbidden\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let url = format!("ws://{addr}/cockpit/socket");
        let err = refused(WebSocketTransport::connect(&url, &[], None).await);
        assert!(matches!(err, Error::Connection { .. }), "got {err}");
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let headers = vec![("bad header".to_owned(), "x".to_owned())];
        let err = refused(tokio_test::block_on(WebSocketTransport::connect(
            "ws://127.0.0.1:1/cockpit/socket",
            &headers,
            None,
        )));
        assert!(matches!(err, Error::Config { .. }));
    }
}
