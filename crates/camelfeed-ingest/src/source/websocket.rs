//! WebSocket firehose source.
//!
//! Subscribes to `{endpoint}?cursor={seq}` and decodes each text or binary
//! message as one JSON frame (see [`camelfeed_core::frame`]). Pings are
//! answered inline. A close frame, EOF, a transport error, or an undecodable
//! frame ends the current connection.

use std::time::Duration;

use camelfeed_core::{FirehoseEvent, decode_frame};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::EventSource;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the WebSocket source.
///
/// The endpoint must emit one JSON object per message in the commit frame
/// shape decoded by [`decode_frame`] (`kind`, `seq`, `repo`, `time`, `ops`).
/// Relays that speak binary DAG-CBOR `subscribeRepos` frames need a JSON
/// bridge in front of them; pointed at one directly, every frame fails to
/// decode and the source never gets past the first message.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Subscription endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Handshake timeout.
    pub connect_timeout: Duration,
}

impl WebSocketConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Live firehose over a WebSocket.
pub struct WebSocketSource {
    config: WebSocketConfig,
    stream: Option<WsStream>,
}

impl WebSocketSource {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Append the resume cursor to the subscription URL.
pub fn subscribe_url(endpoint: &str, cursor: Option<u64>) -> String {
    match cursor {
        Some(seq) if endpoint.contains('?') => format!("{endpoint}&cursor={seq}"),
        Some(seq) => format!("{endpoint}?cursor={seq}"),
        None => endpoint.to_string(),
    }
}

impl EventSource for WebSocketSource {
    fn name(&self) -> &str {
        &self.config.endpoint
    }

    async fn connect(&mut self, cursor: Option<u64>) -> Result<()> {
        if let Some(mut old) = self.stream.take() {
            let _ = old.close(None).await;
        }

        let url = subscribe_url(&self.config.endpoint, cursor);
        tracing::info!("Connecting to {}", url);

        let (stream, _response) =
            tokio::time::timeout(self.config.connect_timeout, tokio_tungstenite::connect_async(&url))
                .await
                .map_err(|_| {
                    Error::WebSocket(format!(
                        "connect to {} timed out after {:?}",
                        url, self.config.connect_timeout
                    ))
                })??;

        tracing::info!("Connected to {}", self.config.endpoint);
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<FirehoseEvent>> {
        let result = self.read_frame().await;
        if !matches!(result, Ok(Some(_))) {
            self.stream = None;
        }
        result
    }
}

impl WebSocketSource {
    async fn read_frame(&mut self) -> Result<Option<FirehoseEvent>> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        loop {
            let msg = match stream.next().await {
                Some(msg) => msg?,
                None => return Ok(None),
            };

            match msg {
                Message::Text(text) => return Ok(Some(decode_frame(text.as_str().as_bytes())?)),
                Message::Binary(data) => return Ok(Some(decode_frame(&data)?)),
                Message::Ping(data) => {
                    if let Err(e) = stream.send(Message::Pong(data)).await {
                        tracing::debug!("Failed to answer ping: {}", e);
                    }
                }
                Message::Close(frame) => {
                    tracing::info!("Upstream closed the stream: {:?}", frame);
                    return Ok(None);
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_url_without_cursor() {
        assert_eq!(subscribe_url("wss://host/sub", None), "wss://host/sub");
    }

    #[test]
    fn test_subscribe_url_with_cursor() {
        assert_eq!(
            subscribe_url("wss://host/sub", Some(40)),
            "wss://host/sub?cursor=40"
        );
        assert_eq!(
            subscribe_url("wss://host/sub?wantedCollections=x", Some(40)),
            "wss://host/sub?wantedCollections=x&cursor=40"
        );
    }

    #[tokio::test]
    async fn test_next_event_before_connect() {
        let mut source = WebSocketSource::new(WebSocketConfig::new("ws://127.0.0.1:1/subscribe"));
        assert!(!source.is_connected());
        assert!(matches!(source.next_event().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_an_error() {
        let mut source = WebSocketSource::new(WebSocketConfig {
            endpoint: "ws://127.0.0.1:1/subscribe".to_string(),
            connect_timeout: Duration::from_secs(2),
        });
        assert!(source.connect(Some(1)).await.is_err());
        assert!(!source.is_connected());
    }
}
