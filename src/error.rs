//! Error types for the chess synchronization client.

use thiserror::Error;

/// Errors that can occur at the transport and client-handle boundary.
///
/// Nothing in the synchronization core propagates these as faults: transport
/// failures turn into reconnection decisions, and everything else is reported
/// as a [`ChessEvent`](crate::event::ChessEvent).
#[derive(Debug, Error)]
pub enum ChessSyncError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The peer closed the connection with a non-normal close code.
    #[error("transport closed with code {code}: {reason}")]
    TransportClosed {
        /// WebSocket-style close code.
        code: u16,
        /// Close reason text supplied by the peer (may be empty).
        reason: String,
    },

    /// The transport was already closed locally.
    #[error("transport already closed")]
    AlreadyClosed,

    /// Establishing a new transport failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// Failed to serialize an outgoing protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client's background event loop is gone.
    #[error("client is shut down")]
    ShutDown,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for chess sync client operations.
pub type Result<T> = std::result::Result<T, ChessSyncError>;

/// Reasons an inbound message was discarded by the codec.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes are not a JSON envelope at all.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The envelope has no usable `type` tag.
    #[error("envelope has no message type")]
    MissingType,

    /// The `type` tag is outside the known vocabulary.
    #[error("unknown message type {0:?}")]
    UnknownType(String),

    /// The `type` is known but the payload is missing fields or has bad values.
    #[error("invalid {kind} payload: {detail}")]
    InvalidPayload {
        /// The envelope's `type` tag.
        kind: String,
        /// What serde reported about the payload.
        detail: String,
    },
}

/// Why a local move was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveRejection {
    /// The rules engine does not allow the move in the current position.
    #[error("illegal move")]
    IllegalMove,

    /// It is the opponent's turn (or the local side is only spectating).
    #[error("not your turn")]
    NotYourTurn,

    /// Spectators can never submit moves.
    #[error("spectators cannot move")]
    Spectator,

    /// The lifecycle is not in progress.
    #[error("game is not in progress")]
    NotInProgress,

    /// A promotion choice is outstanding for a different move.
    #[error("a promotion choice is pending")]
    PromotionPending,

    /// `resolve_promotion` was called with no promotion outstanding.
    #[error("no promotion is pending")]
    NoPendingPromotion,

    /// The connection is not open, so the move could not be transmitted.
    #[error("not connected to server")]
    NotConnected,

    /// A reconnection happened and the authoritative snapshot has not arrived yet.
    #[error("waiting for the server to resync the game")]
    AwaitingResync,
}
