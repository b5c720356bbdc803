//! Async client handle for the chess synchronization core.
//!
//! [`ChessClient`] is a thin handle that forwards user intents to a
//! background event loop over an unbounded MPSC channel. The loop owns the
//! [`ConnectionManager`] and the [`SessionCore`]; it multiplexes commands,
//! inbound messages, the reconnect timer, the clock tick, and the game-list
//! refresh with `tokio::select!`. Events come back on the bounded channel
//! returned from [`ChessClient::start`], and the latest connection state and
//! [`SessionView`] are published through `watch` channels.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ChessSyncConfig::new("ws://localhost:8080");
//! let (client, mut events) = ChessClient::start(WebSocketConnector::new(), config);
//!
//! client.new_game()?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ChessEvent::GameStarted { color, .. } => println!("playing {color}"),
//!         ChessEvent::PromotionRequired { .. } => client.resolve_promotion(PieceKind::Queen)?,
//!         ChessEvent::Shutdown => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::codec;
use crate::connection::{BackoffPolicy, ConnectionEvent, ConnectionManager, ConnectionState};
use crate::error::{ChessSyncError, Result};
use crate::event::ChessEvent;
use crate::protocol::{Move, PieceKind, Square};
use crate::rules::{MoveValidator, Position};
use crate::session::{Reaction, SessionCore, SessionView};
use crate::transport::Connector;

/// Endpoint used when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080";

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CLOCK_TICK: Duration = Duration::from_millis(100);
const DEFAULT_GAME_LIST_REFRESH: Duration = Duration::from_secs(5);
const MIN_TIMER_INTERVAL: Duration = Duration::from_millis(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`ChessClient`].
///
/// # Example
///
/// ```
/// use chess_sync_client::client::ChessSyncConfig;
/// use chess_sync_client::connection::BackoffPolicy;
/// use std::time::Duration;
///
/// let config = ChessSyncConfig::new("wss://chess.example.com/ws")
///     .with_backoff(BackoffPolicy::fixed(Duration::from_secs(3), 5))
///     .with_event_channel_capacity(64);
/// assert_eq!(config.backoff.max_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct ChessSyncConfig {
    /// Server URL handed to the [`Connector`].
    pub endpoint: String,
    /// Reconnection schedule and attempt budget.
    pub backoff: BackoffPolicy,
    /// Deadline for one connection attempt. Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning
    /// rather than stalling the loop. [`ChessEvent::Shutdown`] is always
    /// delivered. Defaults to **256**; values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`ChessClient::shutdown`] waits before aborting the loop.
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// How often a running clock emits [`ChessEvent::Clock`]. Defaults to **100 ms**.
    pub clock_tick_interval: Duration,
    /// How often the active-games list is re-requested while
    /// [`ChessClient::watch_games`] is on. Defaults to **5 seconds**.
    pub game_list_refresh_interval: Duration,
}

impl ChessSyncConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            backoff: BackoffPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            clock_tick_interval: DEFAULT_CLOCK_TICK,
            game_list_refresh_interval: DEFAULT_GAME_LIST_REFRESH,
        }
    }

    /// Use the endpoint baked in at build time through `CHESS_SYNC_ENDPOINT`,
    /// falling back to [`DEFAULT_ENDPOINT`].
    pub fn from_build_env() -> Self {
        Self::new(option_env!("CHESS_SYNC_ENDPOINT").unwrap_or(DEFAULT_ENDPOINT))
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// A zero timeout aborts the loop immediately on shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_clock_tick_interval(mut self, interval: Duration) -> Self {
        self.clock_tick_interval = interval.max(MIN_TIMER_INTERVAL);
        self
    }

    #[must_use]
    pub fn with_game_list_refresh_interval(mut self, interval: Duration) -> Self {
        self.game_list_refresh_interval = interval.max(MIN_TIMER_INTERVAL);
        self
    }
}

impl Default for ChessSyncConfig {
    fn default() -> Self {
        Self::from_build_env()
    }
}

// ── Commands ────────────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    NewGame,
    SubmitMove(Move),
    ResolvePromotion(PieceKind),
    CancelPromotion,
    Spectate(String),
    LeaveSpectate,
    FetchGames,
    WatchGames(bool),
    Reset,
    Retry,
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to a running synchronization loop.
///
/// Every intent method only enqueues a command and returns immediately. The
/// outcome arrives as a [`ChessEvent`]. Dropping the handle aborts the loop;
/// call [`shutdown`](Self::shutdown) for a graceful close.
pub struct ChessClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    connection_rx: watch::Receiver<ConnectionState>,
    view_rx: watch::Receiver<SessionView>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl ChessClient {
    /// Spawn the event loop and return the handle plus the event receiver.
    ///
    /// The loop opens the first connection immediately. Must be called from
    /// within a Tokio runtime.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<C: Connector>(
        connector: C,
        config: ChessSyncConfig,
    ) -> (Self, mpsc::Receiver<ChessEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (event_tx, event_rx) = mpsc::channel::<ChessEvent>(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let core = SessionCore::new();
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Closed);
        let (view_tx, view_rx) = watch::channel(core.view(now()));

        let manager = ConnectionManager::new(connector, config.endpoint.clone(), config.backoff)
            .with_connect_timeout(config.connect_timeout);

        let event_loop = EventLoop {
            manager,
            core,
            event_tx,
            connection_tx,
            view_tx,
            clock_timer: timer(config.clock_tick_interval),
            refresh_timer: timer(config.game_list_refresh_interval),
            watching_games: false,
        };
        let task = tokio::spawn(event_loop.run(cmd_rx, shutdown_rx));

        let client = Self {
            cmd_tx,
            connection_rx,
            view_rx,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (client, event_rx)
    }

    // ── Intents ─────────────────────────────────────────────────────

    /// Ask the server to pair us into a new game.
    ///
    /// # Errors
    ///
    /// Returns [`ChessSyncError::ShutDown`] if the loop has stopped. The same
    /// applies to every other intent method.
    pub fn new_game(&self) -> Result<()> {
        self.command(Command::NewGame)
    }

    /// Submit a move for the local player.
    pub fn submit_move(&self, mv: Move) -> Result<()> {
        self.command(Command::SubmitMove(mv))
    }

    /// Choose the piece for a pending promotion.
    pub fn resolve_promotion(&self, piece: PieceKind) -> Result<()> {
        self.command(Command::ResolvePromotion(piece))
    }

    pub fn cancel_promotion(&self) -> Result<()> {
        self.command(Command::CancelPromotion)
    }

    /// Watch `game_id` as a spectator.
    pub fn spectate(&self, game_id: impl Into<String>) -> Result<()> {
        self.command(Command::Spectate(game_id.into()))
    }

    pub fn leave_spectate(&self) -> Result<()> {
        self.command(Command::LeaveSpectate)
    }

    /// Request the active-games list once.
    pub fn fetch_games(&self) -> Result<()> {
        self.command(Command::FetchGames)
    }

    /// Turn periodic game-list refresh on or off.
    pub fn watch_games(&self, enabled: bool) -> Result<()> {
        self.command(Command::WatchGames(enabled))
    }

    /// Abandon the current game or spectate session and go back to idle.
    pub fn reset(&self) -> Result<()> {
        self.command(Command::Reset)
    }

    /// Reconnect after [`ChessEvent::Unreachable`], with a fresh attempt budget.
    ///
    /// Ignored while the connection is open, opening, or waiting for a
    /// scheduled reconnect.
    pub fn retry(&self) -> Result<()> {
        self.command(Command::Retry)
    }

    /// Stop the loop, close the connection, and wait for it to finish.
    ///
    /// The loop gets `shutdown_timeout` to close gracefully and emit
    /// [`ChessEvent::Shutdown`]; after that it is aborted.
    pub async fn shutdown(&mut self) {
        debug!("ChessClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("event loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("event loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("event loop aborted: {join_err}");
                    }
                }
            }
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Open
    }

    /// Latest session snapshot published by the loop.
    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    /// A receiver that is notified whenever the view changes.
    pub fn subscribe_view(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// Legal targets for the piece on `from` in the displayed position.
    pub fn legal_destinations(&self, from: Square) -> Vec<Square> {
        let fen = self.view_rx.borrow().fen.clone();
        match Position::from_fen(&fen) {
            Ok(position) => MoveValidator::new().legal_destinations(&position, from),
            Err(err) => {
                debug!(error = %err, "no position to query");
                Vec::new()
            }
        }
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| ChessSyncError::ShutDown)
    }
}

impl std::fmt::Debug for ChessClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChessClient")
            .field("connection", &self.connection_state())
            .field("lifecycle", &self.view_rx.borrow().lifecycle)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for ChessClient {
    fn drop(&mut self) {
        // No executor to drive a graceful close from here; abort instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Event loop ──────────────────────────────────────────────────────

struct EventLoop<C: Connector> {
    manager: ConnectionManager<C>,
    core: SessionCore,
    event_tx: mpsc::Sender<ChessEvent>,
    connection_tx: watch::Sender<ConnectionState>,
    view_tx: watch::Sender<SessionView>,
    clock_timer: Interval,
    refresh_timer: Interval,
    watching_games: bool,
}

impl<C: Connector> EventLoop<C> {
    /// Runs until the command channel closes or shutdown is signalled.
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!(endpoint = %self.manager.endpoint(), "event loop started");

        if let Err(err) = self.manager.connect().await {
            debug!(error = %err, "initial connection failed");
        }
        self.drain_manager().await;
        self.publish();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.on_command(cmd).await,
                        None => {
                            debug!("command channel closed, stopping event loop");
                            break;
                        }
                    }
                }

                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    self.flush_commands(&mut cmd_rx).await;
                    break;
                }

                event = self.manager.next_event() => self.on_connection_event(event).await,

                _ = self.clock_timer.tick() => {
                    let reaction = self.core.tick(now());
                    self.dispatch(reaction).await;
                }

                _ = self.refresh_timer.tick(), if self.watching_games => {
                    if self.manager.is_open() {
                        let reaction = self.core.fetch_games();
                        self.dispatch(reaction).await;
                    }
                }
            }
            self.publish();
        }

        self.manager.close().await;
        self.publish();
        emit_final(&self.event_tx, ChessEvent::Shutdown).await;
        debug!("event loop exited");
    }

    async fn on_command(&mut self, cmd: Command) {
        debug!(?cmd, "command");
        let now = now();
        let connected = self.manager.is_open();
        let reaction = match cmd {
            Command::NewGame => self.core.new_game(),
            Command::SubmitMove(mv) => self.core.submit_move(mv, connected, now),
            Command::ResolvePromotion(piece) => self.core.resolve_promotion(piece, connected, now),
            Command::CancelPromotion => {
                self.core.cancel_promotion();
                Reaction::default()
            }
            Command::Spectate(game_id) => self.core.spectate(&game_id),
            Command::LeaveSpectate => self.core.leave_spectate(now),
            Command::FetchGames => self.core.fetch_games(),
            Command::WatchGames(enabled) => {
                self.watching_games = enabled;
                self.refresh_timer.reset();
                if enabled {
                    self.core.fetch_games()
                } else {
                    Reaction::default()
                }
            }
            Command::Reset => self.core.reset(),
            Command::Retry => {
                if !self.manager.is_idle() {
                    debug!(state = %self.manager.state(), "ignoring retry, connection not idle");
                    return;
                }
                let reaction = self.core.on_retry();
                self.dispatch(reaction).await;
                if let Err(err) = self.manager.connect().await {
                    debug!(error = %err, "retry failed");
                }
                self.drain_manager().await;
                return;
            }
        };
        self.dispatch(reaction).await;
    }

    /// Run intents queued before shutdown, such as a final leave, so they
    /// reach the server before the connection closes. Retries are dropped.
    async fn flush_commands(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<Command>) {
        while let Ok(cmd) = cmd_rx.try_recv() {
            if matches!(cmd, Command::Retry) {
                continue;
            }
            self.on_command(cmd).await;
        }
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        if event == ConnectionEvent::RetryDue {
            if let Err(err) = self.manager.reconnect().await {
                debug!(error = %err, "reconnect attempt failed");
            }
            self.drain_manager().await;
            return;
        }
        self.handle_connection_event(event).await;
    }

    /// Handle events queued by `connect`/`reconnect` right away, so the
    /// resync for a fresh connection goes out before any queued command.
    async fn drain_manager(&mut self) {
        for event in self.manager.take_pending() {
            self.handle_connection_event(event).await;
        }
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let now = now();
        match event {
            ConnectionEvent::Opened { reconnected } => {
                emit_event(
                    &self.event_tx,
                    if reconnected {
                        ChessEvent::Reconnected
                    } else {
                        ChessEvent::Connected
                    },
                );
                let reaction = self.core.on_connection_opened();
                self.dispatch(reaction).await;
            }
            ConnectionEvent::Message(text) => match codec::decode_or_log(&text) {
                Ok(message) => {
                    let reaction = self.core.handle_server_message(message, now);
                    self.dispatch(reaction).await;
                }
                Err(err) => emit_event(
                    &self.event_tx,
                    ChessEvent::MessageDiscarded {
                        error: err.to_string(),
                    },
                ),
            },
            ConnectionEvent::Closed { code, reason } => {
                emit_event(&self.event_tx, ChessEvent::Disconnected { code, reason });
            }
            ConnectionEvent::ReconnectScheduled { attempt, delay } => {
                emit_event(
                    &self.event_tx,
                    ChessEvent::ReconnectScheduled { attempt, delay },
                );
            }
            ConnectionEvent::Unreachable => {
                let reaction = self.core.on_unreachable(now);
                self.dispatch(reaction).await;
            }
            ConnectionEvent::RetryDue => {
                debug!("retry timer fired during drain; handled on next poll");
            }
        }
    }

    /// Send the reaction's outgoing messages, then surface its events.
    async fn dispatch(&mut self, reaction: Reaction) {
        for message in reaction.outgoing {
            match codec::encode(&message) {
                Ok(json) => {
                    if !self.manager.send(json).await {
                        debug!(kind = message.type_tag(), "message not sent");
                    }
                }
                Err(err) => error!(kind = message.type_tag(), error = %err, "failed to encode"),
            }
        }
        for event in reaction.events {
            emit_event(&self.event_tx, event);
        }
    }

    fn publish(&self) {
        self.connection_tx.send_replace(self.manager.state());
        self.view_tx.send_replace(self.core.view(now()));
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

fn timer(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period.max(MIN_TIMER_INTERVAL));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Emit an event without blocking. A full channel drops the event with a
/// warning.
fn emit_event(event_tx: &mpsc::Sender<ChessEvent>, event: ChessEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(event = ?dropped, "event channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit the last event of the stream. Waits for capacity so it is never lost.
async fn emit_final(event_tx: &mpsc::Sender<ChessEvent>, event: ChessEvent) {
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
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
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ChessSyncConfig::new("ws://example.test");
        assert_eq!(config.endpoint, "ws://example.test");
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.game_list_refresh_interval, Duration::from_secs(5));
        assert_eq!(config.backoff, BackoffPolicy::default());
    }

    #[test]
    fn config_clamps_capacity_and_intervals() {
        let config = ChessSyncConfig::new("ws://example.test")
            .with_event_channel_capacity(0)
            .with_clock_tick_interval(Duration::ZERO)
            .with_game_list_refresh_interval(Duration::ZERO);
        assert_eq!(config.event_channel_capacity, 1);
        assert!(config.clock_tick_interval > Duration::ZERO);
        assert!(config.game_list_refresh_interval > Duration::ZERO);
    }

    #[test]
    fn build_env_endpoint_falls_back_to_default() {
        let config = ChessSyncConfig::from_build_env();
        let expected = option_env!("CHESS_SYNC_ENDPOINT").unwrap_or(DEFAULT_ENDPOINT);
        assert_eq!(config.endpoint, expected);
    }

    #[tokio::test]
    async fn full_event_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        emit_event(&tx, ChessEvent::Connected);
        emit_event(&tx, ChessEvent::Reconnected);
        assert_eq!(rx.recv().await, Some(ChessEvent::Connected));
        assert!(rx.try_recv().is_err());
    }
}
