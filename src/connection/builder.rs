//! Builder pattern for connection configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use cockpit_transport::Connection;
//!
//! # async fn example() -> cockpit_transport::Result<()> {
//! let connection = Connection::builder()
//!     .url("ws://localhost:9090/cockpit/socket")
//!     .header("Cookie", "cockpit=...")
//!     .init_timeout(Duration::from_secs(10))
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::flow::DEFAULT_WINDOW;
use crate::transport::{Transport, WebSocketTransport};

use super::core::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Default time to wait for the bridge's `init`.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Settings handed to the connection once the transport exists.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionConfig {
    pub window: u64,
    pub init_timeout: Duration,
    pub origin: Option<String>,
}

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for configuring a [`Connection`].
///
/// Use [`Connection::builder()`] to create a new builder.
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    /// Bridge socket url.
    url: Option<String>,
    /// Origin this end identifies as.
    origin: Option<String>,
    /// Extra headers for the upgrade request.
    headers: Vec<(String, String)>,
    /// Congestion window per channel.
    window: u64,
    /// Handshake deadline.
    init_timeout: Duration,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self {
            url: None,
            origin: None,
            headers: Vec::new(),
            window: DEFAULT_WINDOW,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

// ============================================================================
// ConnectionBuilder Implementation
// ============================================================================

impl ConnectionBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bridge socket url (`ws://host:port/cockpit/socket`).
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the origin sent with the upgrade request and stamped on relay
    /// envelopes. Derived from the url when not set.
    #[inline]
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Adds a header to the upgrade request (cookies, authorization).
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the per-channel congestion window in bytes.
    #[inline]
    #[must_use]
    pub fn window(mut self, bytes: u64) -> Self {
        self.window = bytes;
        self
    }

    /// Sets how long to wait for the bridge's `init`.
    #[inline]
    #[must_use]
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Connects over WebSocket and completes the handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the url is missing or invalid
    /// - [`Error::WebSocket`] if the upgrade fails
    /// - [`Error::Protocol`] if the bridge's first message is not a valid `init`
    /// - [`Error::ConnectionTimeout`] if no `init` arrives in time
    pub async fn connect(self) -> Result<Connection> {
        let url = self.validate_url()?;
        self.validate_window()?;

        let origin = self.origin.clone().or_else(|| http_origin(&url));
        let transport = WebSocketTransport::connect(url.as_str(), &self.headers, origin).await?;

        Connection::establish(Box::new(transport), self.config()).await
    }

    /// Completes the handshake over an existing transport.
    ///
    /// The url and headers are ignored.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the window is zero
    /// - [`Error::Protocol`] if the bridge's first message is not a valid `init`
    /// - [`Error::ConnectionTimeout`] if no `init` arrives in time
    pub async fn connect_with(self, transport: impl Transport) -> Result<Connection> {
        self.validate_window()?;
        Connection::establish(Box::new(transport), self.config()).await
    }

    fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            window: self.window,
            init_timeout: self.init_timeout,
            origin: self.origin.clone(),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConnectionBuilder {
    fn validate_url(&self) -> Result<Url> {
        let raw = self.url.as_deref().ok_or_else(|| {
            Error::config(
                "Bridge url is required. Use .url() to set it.\n\
                 Example: Connection::builder().url(\"ws://localhost:9090/cockpit/socket\")",
            )
        })?;

        let url = Url::parse(raw).map_err(|e| Error::config(format!("invalid url {raw}: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(Error::config(format!(
                "unsupported url scheme {scheme}, expected ws or wss"
            ))),
        }
    }

    fn validate_window(&self) -> Result<()> {
        if self.window == 0 {
            return Err(Error::config("congestion window must be positive"));
        }
        Ok(())
    }
}

/// Maps a socket url to the HTTP origin a browser would send.
fn http_origin(url: &Url) -> Option<String> {
    let mut http = url.clone();
    let scheme = if url.scheme() == "wss" { "https" } else { "http" };
    http.set_scheme(scheme).ok()?;
    Some(http.origin().ascii_serialization())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let builder = ConnectionBuilder::new();
        assert!(builder.url.is_none());
        assert_eq!(builder.window, DEFAULT_WINDOW);
        assert_eq!(builder.init_timeout, DEFAULT_INIT_TIMEOUT);
    }

    #[test]
    fn test_setters() {
        let builder = ConnectionBuilder::new()
            .url("ws://localhost:9090/cockpit/socket")
            .origin("https://localhost:9090")
            .header("Cookie", "cockpit=abc")
            .window(1024)
            .init_timeout(Duration::from_secs(5));

        assert_eq!(builder.url.as_deref(), Some("ws://localhost:9090/cockpit/socket"));
        assert_eq!(builder.headers, vec![("Cookie".to_owned(), "cockpit=abc".to_owned())]);
        assert_eq!(builder.config().window, 1024);
        assert_eq!(builder.config().origin.as_deref(), Some("https://localhost:9090"));
    }

    #[test]
    fn test_missing_url() {
        let err = ConnectionBuilder::new().validate_url().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_rejects_http_scheme() {
        let err = ConnectionBuilder::new()
            .url("http://localhost/cockpit/socket")
            .validate_url()
            .unwrap_err();
        assert!(err.to_string().contains("unsupported url scheme"));
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(ConnectionBuilder::new().window(0).validate_window().is_err());
    }

    #[test]
    fn test_origin_from_url() {
        let url = Url::parse("wss://example.com:9090/cockpit/socket").expect("url");
        assert_eq!(http_origin(&url).as_deref(), Some("https://example.com:9090"));

        let url = Url::parse("ws://localhost/cockpit/socket").expect("url");
        assert_eq!(http_origin(&url).as_deref(), Some("http://localhost"));
    }
}
