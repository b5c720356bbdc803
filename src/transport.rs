//! Transport seams: a connected text channel and a way to open one.
//!
//! [`Transport`] is one live connection carrying JSON envelopes as text.
//! [`Connector`] opens a fresh [`Transport`] to an endpoint; the
//! [`ConnectionManager`](crate::connection::ConnectionManager) calls it for
//! the first connection and for every reconnection attempt.
//!
//! # Close semantics
//!
//! `recv` returning `None` means the peer closed with the normal close code
//! (1000). Any other close is reported as
//! `Some(Err(ChessSyncError::TransportClosed { code, reason }))`, and any
//! other error is treated as an abnormal drop. Only a normal close keeps the
//! connection manager from reconnecting.
//!
//! # Implementing a custom transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use chess_sync_client::error::ChessSyncError;
//! use chess_sync_client::transport::{Connector, Transport};
//!
//! struct MyTransport;
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), ChessSyncError> {
//!         Err(ChessSyncError::TransportSend("not wired up".into()))
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, ChessSyncError>> {
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ChessSyncError> {
//!         Ok(())
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Transport = MyTransport;
//!
//!     async fn connect(&self, endpoint: &str) -> Result<MyTransport, ChessSyncError> {
//!         Ok(MyTransport)
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ChessSyncError;

/// A bidirectional text message channel.
///
/// Each [`send`](Transport::send) transmits one complete envelope and each
/// [`recv`](Transport::recv) yields one.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: it runs inside
/// `tokio::select!`, and a cancelled call must not lose a message.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text message.
    ///
    /// # Errors
    ///
    /// Returns [`ChessSyncError::TransportSend`] if the message could not be
    /// written, or [`ChessSyncError::AlreadyClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), ChessSyncError>;

    /// Receive the next text message.
    ///
    /// - `Some(Ok(text))`: a message arrived
    /// - `Some(Err(ChessSyncError::TransportClosed { .. }))`: non-normal close
    /// - `Some(Err(_))`: the connection broke
    /// - `None`: the peer closed normally
    async fn recv(&mut self) -> Option<Result<String, ChessSyncError>>;

    /// Close with the normal close code.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Resources are released
    /// either way.
    async fn close(&mut self) -> Result<(), ChessSyncError>;
}

/// Opens new transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Establish a connection to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ChessSyncError::Connect`], [`ChessSyncError::Io`], or
    /// [`ChessSyncError::Timeout`] when the connection cannot be opened.
    async fn connect(&self, endpoint: &str) -> Result<Self::Transport, ChessSyncError>;
}
