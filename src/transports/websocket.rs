//! WebSocket transport over `tokio-tungstenite`.
//!
//! Both `ws://` and `wss://` endpoints work; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream). Close frames are
//! translated into the close semantics documented on
//! [`Transport`]: a normal close ends the stream, anything else surfaces its
//! code so the connection manager can decide whether to reconnect.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), chess_sync_client::ChessSyncError> {
//! use chess_sync_client::{Transport, WebSocketTransport};
//!
//! let mut transport = WebSocketTransport::connect("ws://localhost:8080").await?;
//! transport.send(r#"{"type":"FETCH_GAMES","payload":{}}"#.to_string()).await?;
//!
//! if let Some(Ok(msg)) = transport.recv().await {
//!     println!("received: {msg}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

use crate::connection::close_code;
use crate::error::ChessSyncError;
use crate::transport::{Connector, Transport};

/// The underlying stream type, public for [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by one WebSocket connection.
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future never loses
/// a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ChessSyncError::Io`] if the URL is invalid or the handshake
    /// fails. I/O error kinds are preserved; other failures map to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, ChessSyncError> {
        tracing::debug!(url = %url, "connecting to game server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            ChessSyncError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "game server connection established");
        Ok(Self::from_stream(stream))
    }

    /// Wrap a stream set up elsewhere (custom TLS, headers, proxies).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// [`connect`](Self::connect) with a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ChessSyncError::Timeout`] if the deadline passes first.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, ChessSyncError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| ChessSyncError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), ChessSyncError> {
        if self.closed {
            return Err(ChessSyncError::AlreadyClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| ChessSyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChessSyncError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(ChessSyncError::TransportReceive(e.to_string())));
                }
                None if self.closed => return None,
                None => {
                    return Some(Err(ChessSyncError::TransportClosed {
                        code: close_code::ABNORMAL,
                        reason: "stream ended without a close frame".into(),
                    }));
                }
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received close frame");
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (close_code::NO_STATUS, String::new()),
                    };
                    if code == close_code::NORMAL {
                        return None;
                    }
                    return Some(Err(ChessSyncError::TransportClosed { code, reason }));
                }
                Message::Binary(_) => {
                    tracing::warn!("skipping binary frame");
                }
                // Pings are answered by tungstenite.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChessSyncError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(Some(CloseFrame {
                code: WsCloseCode::Normal,
                reason: "".into(),
            }))
            .await
            .map_err(|e| ChessSyncError::TransportSend(e.to_string()))
    }
}

/// Opens a [`WebSocketTransport`] per connection attempt.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    timeout: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail an attempt that takes longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self, endpoint: &str) -> Result<WebSocketTransport, ChessSyncError> {
        match self.timeout {
            Some(timeout) => WebSocketTransport::connect_with_timeout(endpoint, timeout).await,
            None => WebSocketTransport::connect(endpoint).await,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Accept one WebSocket connection on a local port, run `handler` on it,
    /// and return the URL to connect to.
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    fn close_with(code: WsCloseCode, reason: &'static str) -> Option<CloseFrame> {
        Some(CloseFrame {
            code,
            reason: reason.into(),
        })
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, ChessSyncError::Io(_)));
    }

    #[tokio::test]
    async fn connector_reports_unreachable_host() {
        let err = WebSocketConnector::new()
            .connect("ws://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, ChessSyncError::Io(_)));
    }

    #[tokio::test]
    async fn connector_times_out() {
        let err = WebSocketConnector::new()
            .with_timeout(Duration::from_millis(50))
            .connect("ws://192.0.2.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, ChessSyncError::Timeout));
    }

    #[tokio::test]
    async fn receives_envelopes_then_normal_close() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Text(
                r#"{"type":"INIT_GAME","payload":{"color":"white"}}"#.into(),
            ))
            .await
            .unwrap();
            ws.close(close_with(WsCloseCode::Normal, "bye")).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert!(msg.contains("INIT_GAME"));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn non_normal_close_reports_code() {
        let url = serve_once(|mut ws| async move {
            ws.close(close_with(WsCloseCode::Away, "restarting"))
                .await
                .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        match transport.recv().await {
            Some(Err(ChessSyncError::TransportClosed { code, reason })) => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "restarting");
            }
            other => panic!("expected TransportClosed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_without_status_is_not_normal() {
        let url = serve_once(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert!(matches!(
            transport.recv().await,
            Some(Err(ChessSyncError::TransportClosed {
                code: close_code::NO_STATUS,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn skips_binary_frames() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "after_binary");
    }

    #[tokio::test]
    async fn send_echo_round_trip() {
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(close_with(WsCloseCode::Normal, "")).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.send("e2e4".to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "e2e4");
    }

    #[tokio::test]
    async fn send_after_close_fails_and_close_is_idempotent() {
        let url = serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, ChessSyncError::AlreadyClosed));
    }
}
