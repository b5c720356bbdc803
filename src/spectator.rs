//! Read-only spectator handle.
//!
//! [`SpectatorSession`] wraps a [`ChessClient`] that joins one game as an
//! observer. It exposes no move submission at all; the session core would
//! reject spectator moves anyway, but this handle makes the restriction part
//! of the type.

use tokio::sync::{mpsc, watch};

use crate::client::{ChessClient, ChessSyncConfig};
use crate::connection::ConnectionState;
use crate::error::Result;
use crate::event::ChessEvent;
use crate::lifecycle::LifecycleState;
use crate::session::SessionView;
use crate::transport::Connector;

/// A client that watches a single game.
#[derive(Debug)]
pub struct SpectatorSession {
    client: ChessClient,
    game_id: String,
}

impl SpectatorSession {
    /// Connect and join `game_id` as a spectator.
    ///
    /// If the first connection fails the join is sent as soon as a later
    /// attempt succeeds, and again after every reconnection.
    ///
    /// # Errors
    ///
    /// Returns [`ChessSyncError::ShutDown`](crate::error::ChessSyncError::ShutDown)
    /// if the event loop stopped before the join could be queued.
    pub fn start<C: Connector>(
        connector: C,
        config: ChessSyncConfig,
        game_id: impl Into<String>,
    ) -> Result<(Self, mpsc::Receiver<ChessEvent>)> {
        let game_id = game_id.into();
        let (client, events) = ChessClient::start(connector, config);
        client.spectate(game_id.clone())?;
        Ok((Self { client, game_id }, events))
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Whether the server is currently streaming this game to us.
    pub fn is_watching(&self) -> bool {
        matches!(
            self.client.view().lifecycle,
            LifecycleState::SpectatorWatching { .. }
        )
    }

    /// Stop watching. The connection stays open for [`fetch_games`](Self::fetch_games).
    pub fn leave(&self) -> Result<()> {
        self.client.leave_spectate()
    }

    pub fn fetch_games(&self) -> Result<()> {
        self.client.fetch_games()
    }

    /// Reconnect after [`ChessEvent::Unreachable`].
    pub fn retry(&self) -> Result<()> {
        self.client.retry()
    }

    pub fn view(&self) -> SessionView {
        self.client.view()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<SessionView> {
        self.client.subscribe_view()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.connection_state()
    }

    /// Leave the game and stop the event loop.
    pub async fn shutdown(&mut self) {
        let _ = self.client.leave_spectate();
        self.client.shutdown().await;
    }
}
