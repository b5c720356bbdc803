//! # Chess Sync Client
//!
//! Game-state synchronization core for a real-time multiplayer chess client.
//!
//! The crate keeps a local board in step with an authoritative server over a
//! bidirectional text transport. Local moves are applied optimistically and
//! reconciled when the server echoes or overrides them; snapshots replace the
//! local state outright; clocks are estimated locally between authoritative
//! updates; and dropped connections are retried with bounded backoff.
//!
//! ## Layout
//!
//! - [`protocol`] and [`codec`]: the JSON envelope vocabulary and validation
//! - [`rules`]: move legality, promotion detection and SAN on top of `chess`
//! - [`store`], [`clock`], [`lifecycle`]: the synchronous state pieces
//! - [`session`]: a sans-IO core tying them together
//! - [`connection`] and [`transport`]: reconnection and the transport seams
//! - [`client`] and [`spectator`]: the async handles applications use
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "transport-websocket")]
//! # async fn example() -> Result<(), chess_sync_client::ChessSyncError> {
//! use chess_sync_client::{ChessClient, ChessEvent, ChessSyncConfig, PieceKind, WebSocketConnector};
//!
//! let config = ChessSyncConfig::new("ws://localhost:8080");
//! let (client, mut events) = ChessClient::start(WebSocketConnector::new(), config);
//! client.new_game()?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ChessEvent::GameStarted { color, .. } => println!("playing {color}"),
//!         ChessEvent::PromotionRequired { .. } => client.resolve_promotion(PieceKind::Queen)?,
//!         ChessEvent::GameOver { winner, reason } => println!("{winner:?} wins: {reason}"),
//!         ChessEvent::Shutdown => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod clock;
pub mod codec;
pub mod connection;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod protocol;
pub mod rules;
pub mod session;
pub mod spectator;
pub mod store;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{ChessClient, ChessSyncConfig};
pub use clock::{format_clock, ClockReading, ClockSync};
pub use connection::{BackoffPolicy, ConnectionManager, ConnectionState};
pub use error::{ChessSyncError, DecodeError, MoveRejection};
pub use event::ChessEvent;
pub use lifecycle::{GameLifecycle, LifecycleState};
pub use protocol::{ClientMessage, Color, Move, PieceKind, PlayerRole, ServerMessage, Square, Winner};
pub use rules::{AppliedMove, MoveValidator, Position};
pub use session::{SessionCore, SessionView};
pub use spectator::SpectatorSession;
pub use store::{GameSession, GameStateStore};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
