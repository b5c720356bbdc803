//! Sans-IO session core.
//!
//! [`SessionCore`] ties the store, lifecycle, and clock together. It never
//! touches the network: every input returns a [`Reaction`] listing the events
//! to surface and the messages to transmit, and the caller decides what to do
//! with them. The async client drives one of these from its event loop; tests
//! drive it directly.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::clock::{ClockReading, ClockSync};
use crate::error::MoveRejection;
use crate::event::ChessEvent;
use crate::lifecycle::{GameLifecycle, LifecycleState, LifecycleTransition};
use crate::protocol::{
    ClientMessage, Color, GameOverPayload, GameUpdatePayload, InitGamePayload, Move, PieceKind,
    PlayerRole, ResyncPayload, ServerMessage, SpectatePayload, Winner,
};
use crate::rules::{Position, PositionStatus};
use crate::store::{GameStateStore, LocalMoveOutcome, PendingPromotion, ServerMoveOutcome};

/// What the caller should do after feeding an input to [`SessionCore`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reaction {
    pub events: Vec<ChessEvent>,
    pub outgoing: Vec<ClientMessage>,
}

impl Reaction {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.outgoing.is_empty()
    }

    fn emit(&mut self, event: ChessEvent) {
        self.events.push(event);
    }

    fn send(&mut self, message: ClientMessage) {
        self.outgoing.push(message);
    }
}

/// Read-only picture of the session for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub lifecycle: LifecycleState,
    pub role: PlayerRole,
    pub game_id: Option<String>,
    /// Displayed position, including any speculative move.
    pub fen: String,
    pub confirmed_fen: String,
    pub turn: Color,
    pub clocks: ClockReading,
    pub pending_promotion: Option<PendingPromotion>,
    pub speculating: bool,
    pub awaiting_resync: bool,
    /// Confirmed moves in SAN.
    pub moves: Vec<String>,
}

impl SessionView {
    /// Which side belongs at the bottom of the board.
    pub fn orientation(&self) -> Color {
        self.role.board_orientation()
    }
}

impl Default for SessionView {
    fn default() -> Self {
        SessionCore::new().view(Instant::now())
    }
}

/// Store, lifecycle, and clock for one client.
#[derive(Debug, Clone, Default)]
pub struct SessionCore {
    store: GameStateStore,
    lifecycle: GameLifecycle,
    clock: ClockSync,
}

impl SessionCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &GameStateStore {
        &self.store
    }

    pub fn lifecycle(&self) -> &LifecycleState {
        self.lifecycle.state()
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    // ── User intents ────────────────────────────────────────────────

    /// Ask the server for a new game.
    pub fn new_game(&mut self) -> Reaction {
        let mut reaction = Reaction::default();
        if let Some(t) = self.lifecycle.request_new_game() {
            self.record(t, &mut reaction);
            reaction.send(ClientMessage::InitGame {});
        }
        reaction
    }

    /// Start watching `game_id`.
    pub fn spectate(&mut self, game_id: &str) -> Reaction {
        let mut reaction = Reaction::default();
        if let Some(t) = self.lifecycle.request_spectate(game_id) {
            self.store.begin_spectating(game_id);
            self.clock = ClockSync::new();
            self.record(t, &mut reaction);
            reaction.send(ClientMessage::JoinSpectate(SpectatePayload {
                game_id: game_id.to_owned(),
            }));
        }
        reaction
    }

    /// Stop watching the current game.
    pub fn leave_spectate(&mut self, now: Instant) -> Reaction {
        let mut reaction = Reaction::default();
        let Some(game_id) = self.lifecycle.state().spectated_game().map(str::to_owned) else {
            return reaction;
        };
        if let Some(t) = self.lifecycle.request_leave_spectate() {
            self.clock.stop(now);
            self.record(t, &mut reaction);
            reaction.send(ClientMessage::LeaveSpectate(SpectatePayload { game_id }));
        }
        reaction
    }

    /// Request the list of active games.
    pub fn fetch_games(&self) -> Reaction {
        Reaction {
            events: Vec::new(),
            outgoing: vec![ClientMessage::FetchGames {}],
        }
    }

    /// Submit a local move. `connected` must reflect whether the transport
    /// can carry it right now; a move that cannot be sent is not applied.
    pub fn submit_move(&mut self, mv: Move, connected: bool, now: Instant) -> Reaction {
        if !connected {
            return rejected(mv, MoveRejection::NotConnected);
        }
        let outcome = self.store.apply_local_move(mv);
        self.after_local_move(mv, outcome, now)
    }

    /// Complete a pending promotion.
    pub fn resolve_promotion(&mut self, piece: PieceKind, connected: bool, now: Instant) -> Reaction {
        let Some(pending) = self.store.pending_promotion() else {
            debug!(?piece, "no promotion pending");
            return Reaction::default();
        };
        let mv = Move::new(pending.from, pending.to).with_promotion(piece);
        if !connected {
            return rejected(mv, MoveRejection::NotConnected);
        }
        let outcome = self.store.resolve_promotion(piece);
        self.after_local_move(mv, outcome, now)
    }

    /// Forget a pending promotion.
    pub fn cancel_promotion(&mut self) {
        if let Some(pending) = self.store.cancel_promotion() {
            debug!(from = %pending.from, to = %pending.to, "promotion cancelled");
        }
    }

    /// Drop back to idle, leaving any spectated game.
    pub fn reset(&mut self) -> Reaction {
        let mut reaction = Reaction::default();
        if let Some(game_id) = self.lifecycle.state().spectated_game() {
            if self.lifecycle.state().is_spectating() {
                reaction.send(ClientMessage::LeaveSpectate(SpectatePayload {
                    game_id: game_id.to_owned(),
                }));
            }
        }
        self.store.reset();
        self.clock = ClockSync::new();
        if let Some(t) = self.lifecycle.reset() {
            self.record(t, &mut reaction);
        }
        reaction
    }

    // ── Connection inputs ───────────────────────────────────────────

    /// A transport just opened. Re-issues whatever the current state needs
    /// from the server: the pairing request, a resync, or the spectate join.
    pub fn on_connection_opened(&mut self) -> Reaction {
        let mut reaction = Reaction::default();
        match self.lifecycle.state() {
            LifecycleState::WaitingForOpponent => reaction.send(ClientMessage::InitGame {}),
            LifecycleState::InProgress => {
                self.store.mark_awaiting_resync();
                reaction.send(ClientMessage::Resync(ResyncPayload {
                    game_id: self.store.session().id.clone(),
                }));
            }
            LifecycleState::SpectatorJoined { game_id }
            | LifecycleState::SpectatorWatching { game_id } => {
                reaction.send(ClientMessage::JoinSpectate(SpectatePayload {
                    game_id: game_id.clone(),
                }));
            }
            _ => {}
        }
        reaction
    }

    /// The reconnection budget is spent.
    pub fn on_unreachable(&mut self, now: Instant) -> Reaction {
        let mut reaction = Reaction::default();
        self.clock.stop(now);
        if let Some(t) = self.lifecycle.on_unreachable() {
            self.record(t, &mut reaction);
        }
        reaction.emit(ChessEvent::Unreachable);
        reaction
    }

    /// The user asked to retry after [`on_unreachable`](Self::on_unreachable).
    pub fn on_retry(&mut self) -> Reaction {
        let mut reaction = Reaction::default();
        if let Some(t) = self.lifecycle.on_retry() {
            self.record(t, &mut reaction);
        }
        reaction
    }

    /// Apply one validated inbound message.
    pub fn handle_server_message(&mut self, message: ServerMessage, now: Instant) -> Reaction {
        let mut reaction = Reaction::default();
        if !self.lifecycle.expects(&message) {
            debug!(
                kind = message.type_tag(),
                state = %self.lifecycle.state(),
                "ignoring message not expected in this state"
            );
            return reaction;
        }

        match message {
            ServerMessage::InitGame(payload) => self.on_init(payload, now, &mut reaction),
            ServerMessage::Move(mv) => self.on_server_move(mv, now, &mut reaction),
            ServerMessage::GameUpdate(payload) => self.on_snapshot(payload, now, &mut reaction),
            ServerMessage::GameOver(GameOverPayload { winner, reason }) => {
                self.finish(winner, &reason, now, &mut reaction);
            }
            ServerMessage::GamesList(list) => {
                reaction.emit(ChessEvent::GamesList { games: list.games });
            }
            ServerMessage::Error(err) => {
                warn!(message = %err.message, "server reported an error");
                reaction.emit(ChessEvent::ServerError {
                    message: err.message,
                });
            }
        }
        reaction
    }

    /// Current clock estimate, while a clock is running.
    ///
    /// A side reaching zero stops the local countdown and is reported once
    /// with [`ChessEvent::ClockExpired`]. The game only ends when the server
    /// says so.
    pub fn tick(&mut self, now: Instant) -> Reaction {
        let mut reaction = Reaction::default();
        if !self.clock.is_running() {
            return reaction;
        }
        reaction.emit(ChessEvent::Clock(self.clock.tick(now)));
        if let Some(color) = self.clock.flagged(now) {
            info!(%color, "clock ran out, waiting for the server");
            self.clock.stop(now);
            reaction.emit(ChessEvent::ClockExpired { color });
        }
        reaction
    }

    pub fn view(&self, now: Instant) -> SessionView {
        let session = self.store.session();
        SessionView {
            lifecycle: self.lifecycle.state().clone(),
            role: session.local_role,
            game_id: session.id.clone(),
            fen: self.store.position().fen(),
            confirmed_fen: self.store.confirmed_position().fen(),
            turn: self.store.turn(),
            clocks: self.clock.tick(now),
            pending_promotion: self.store.pending_promotion(),
            speculating: self.store.speculation().is_some(),
            awaiting_resync: self.store.is_awaiting_resync(),
            moves: self.store.san_history(),
        }
    }

    // ── Handlers ────────────────────────────────────────────────────

    fn after_local_move(&mut self, mv: Move, outcome: LocalMoveOutcome, now: Instant) -> Reaction {
        let mut reaction = Reaction::default();
        match outcome {
            LocalMoveOutcome::Accepted(applied) => {
                self.clock.set_active(Some(self.store.turn()), now);
                reaction.send(ClientMessage::Move(applied.mv));
                reaction.emit(ChessEvent::LocalMoveAccepted { applied });
            }
            LocalMoveOutcome::PromotionRequired(PendingPromotion { from, to }) => {
                reaction.emit(ChessEvent::PromotionRequired { from, to });
            }
            LocalMoveOutcome::Rejected(reason) => return rejected(mv, reason),
        }
        reaction
    }

    fn on_init(&mut self, payload: InitGamePayload, now: Instant, reaction: &mut Reaction) {
        let Some(t) = self.lifecycle.on_init_ack() else {
            return;
        };
        let clocks = ClockReading::new(payload.white_time_ms, payload.black_time_ms);
        self.store
            .begin_game(payload.color, payload.game_id.clone(), clocks, now);
        self.clock = ClockSync::new();
        self.clock
            .on_authoritative_clocks(clocks.white_ms, clocks.black_ms, now);
        self.clock.set_active(Some(Color::White), now);
        self.record(t, reaction);
        reaction.emit(ChessEvent::GameStarted {
            color: payload.color,
            game_id: payload.game_id,
            white_ms: clocks.white_ms,
            black_ms: clocks.black_ms,
        });
    }

    fn on_server_move(&mut self, mv: Move, now: Instant, reaction: &mut Reaction) {
        match self.store.apply_server_move(mv) {
            ServerMoveOutcome::Applied(applied) | ServerMoveOutcome::Converged(applied) => {
                reaction.emit(ChessEvent::ServerMoveApplied { applied });
            }
            ServerMoveOutcome::Overridden {
                speculated,
                authoritative,
            } => {
                reaction.emit(ChessEvent::ReconciliationOverride {
                    speculated,
                    authoritative: authoritative.clone(),
                });
                reaction.emit(ChessEvent::ServerMoveApplied {
                    applied: authoritative,
                });
            }
            ServerMoveOutcome::Rejected(_) => {
                reaction.emit(ChessEvent::ServerMoveRejected { mv });
                return;
            }
        }
        self.clock.set_active(Some(self.store.turn()), now);
        if let Some(t) = self.lifecycle.on_spectator_state() {
            self.record(t, reaction);
        }
    }

    fn on_snapshot(&mut self, payload: GameUpdatePayload, now: Instant, reaction: &mut Reaction) {
        let position = match Position::from_fen(&payload.fen) {
            Ok(position) => position,
            Err(err) => {
                warn!(error = %err, "discarding snapshot");
                reaction.emit(ChessEvent::MessageDiscarded {
                    error: err.to_string(),
                });
                return;
            }
        };

        let clocks = ClockReading::new(payload.white_time_ms, payload.black_time_ms);
        let outcome = match self.store.apply_snapshot(position, payload.turn, clocks, now) {
            Ok(outcome) => outcome,
            Err(err) => {
                reaction.emit(ChessEvent::MessageDiscarded {
                    error: err.to_string(),
                });
                return;
            }
        };
        if let Some(discarded) = &outcome.discarded {
            debug!(san = %discarded.san, "snapshot discarded speculative move");
        }
        self.clock
            .on_authoritative_clocks(clocks.white_ms, clocks.black_ms, now);
        reaction.emit(ChessEvent::SnapshotApplied {
            fen: self.store.confirmed_position().fen(),
            turn: outcome.turn,
        });
        if let Some(t) = self.lifecycle.on_spectator_state() {
            self.record(t, reaction);
        }

        let ending = match outcome.status {
            PositionStatus::Checkmate { winner } => Some((Winner::from(winner), "Checkmate")),
            _ if payload.is_checkmate => Some((Winner::from(outcome.turn.opposite()), "Checkmate")),
            PositionStatus::Stalemate => Some((Winner::Draw, "Stalemate")),
            PositionStatus::Ongoing if payload.is_draw => Some((Winner::Draw, "Draw")),
            PositionStatus::Ongoing => None,
        };
        match ending {
            Some((winner, reason)) => self.finish(winner, reason, now, reaction),
            None => self.clock.set_active(Some(outcome.turn), now),
        }
    }

    fn finish(&mut self, winner: Winner, reason: &str, now: Instant, reaction: &mut Reaction) {
        self.clock.stop(now);
        if let Some(t) = self.lifecycle.on_game_over(winner, reason) {
            self.record(t, reaction);
            reaction.emit(ChessEvent::GameOver {
                winner,
                reason: reason.to_owned(),
            });
        }
    }

    fn record(&mut self, t: LifecycleTransition, reaction: &mut Reaction) {
        self.store.set_status(t.to.clone());
        reaction.emit(ChessEvent::LifecycleChanged {
            from: t.from,
            to: t.to,
        });
    }
}

fn rejected(mv: Move, reason: MoveRejection) -> Reaction {
    debug!(%mv, %reason, "local move rejected");
    Reaction {
        events: vec![ChessEvent::LocalMoveRejected { mv, reason }],
        outgoing: Vec::new(),
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
    use std::time::Duration;

    use super::*;
    use crate::protocol::{DEFAULT_CLOCK_MS, ErrorPayload, GamesListPayload};

    fn mv(s: &str) -> Move {
        s.parse().unwrap()
    }

    fn init(color: Color) -> ServerMessage {
        ServerMessage::InitGame(InitGamePayload {
            color,
            white_time_ms: DEFAULT_CLOCK_MS,
            black_time_ms: DEFAULT_CLOCK_MS,
            game_id: Some("g1".into()),
        })
    }

    fn snapshot(fen: &str, turn: Option<Color>) -> ServerMessage {
        ServerMessage::GameUpdate(GameUpdatePayload {
            fen: fen.into(),
            white_time_ms: 500_000,
            black_time_ms: 400_000,
            turn,
            is_check: false,
            is_checkmate: false,
            is_draw: false,
            game_id: None,
        })
    }

    fn playing(color: Color) -> (SessionCore, Instant) {
        let now = Instant::now();
        let mut core = SessionCore::new();
        let r = core.new_game();
        assert_eq!(r.outgoing, vec![ClientMessage::InitGame {}]);
        core.handle_server_message(init(color), now);
        assert_eq!(*core.lifecycle(), LifecycleState::InProgress);
        (core, now)
    }

    #[test]
    fn new_game_twice_sends_once() {
        let mut core = SessionCore::new();
        assert_eq!(core.new_game().outgoing.len(), 1);
        assert!(core.new_game().is_empty());
    }

    #[test]
    fn init_starts_game_and_white_clock() {
        let (core, now) = playing(Color::Black);
        assert_eq!(core.store().session().local_role, PlayerRole::Black);
        assert_eq!(core.clock().active(), Some(Color::White));
        let view = core.view(now);
        assert_eq!(view.orientation(), Color::Black);
        assert_eq!(view.clocks, ClockReading::new(DEFAULT_CLOCK_MS, DEFAULT_CLOCK_MS));
    }

    #[test]
    fn accepted_move_is_sent_and_reported() {
        let (mut core, now) = playing(Color::White);
        let r = core.submit_move(mv("e2e4"), true, now);
        assert_eq!(r.outgoing, vec![ClientMessage::Move(mv("e2e4"))]);
        assert!(matches!(
            r.events.as_slice(),
            [ChessEvent::LocalMoveAccepted { applied }] if applied.san == "e4"
        ));
        assert_eq!(core.clock().active(), Some(Color::Black));
    }

    #[test]
    fn move_while_disconnected_is_not_applied() {
        let (mut core, now) = playing(Color::White);
        let r = core.submit_move(mv("e2e4"), false, now);
        assert!(r.outgoing.is_empty());
        assert_eq!(
            r.events,
            vec![ChessEvent::LocalMoveRejected {
                mv: mv("e2e4"),
                reason: MoveRejection::NotConnected
            }]
        );
        assert!(core.store().speculation().is_none());
    }

    #[test]
    fn override_reports_both_moves() {
        let (mut core, now) = playing(Color::White);
        core.submit_move(mv("e2e4"), true, now);
        let r = core.handle_server_message(ServerMessage::Move(mv("d2d4")), now);
        assert!(matches!(
            r.events.as_slice(),
            [
                ChessEvent::ReconciliationOverride { speculated, authoritative },
                ChessEvent::ServerMoveApplied { .. },
            ] if speculated.san == "e4" && authoritative.san == "d4"
        ));
    }

    #[test]
    fn promotion_flow_sends_chosen_piece() {
        let (mut core, now) = playing(Color::White);
        core.handle_server_message(snapshot("7k/P7/8/8/8/8/8/K7 w - - 0 1", None), now);

        let r = core.submit_move(mv("a7a8"), true, now);
        assert!(r.outgoing.is_empty());
        assert!(matches!(
            r.events.as_slice(),
            [ChessEvent::PromotionRequired { .. }]
        ));

        let r = core.resolve_promotion(PieceKind::Queen, true, now);
        assert_eq!(r.outgoing, vec![ClientMessage::Move(mv("a7a8q"))]);
    }

    #[test]
    fn snapshot_checkmate_ends_game() {
        let (mut core, now) = playing(Color::White);
        let r = core.handle_server_message(
            snapshot(
                "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
                None,
            ),
            now,
        );
        assert!(r.events.contains(&ChessEvent::GameOver {
            winner: Winner::Black,
            reason: "Checkmate".into()
        }));
        assert!(!core.clock().is_running());

        // The explicit notice that follows is a duplicate.
        let r = core.handle_server_message(
            ServerMessage::GameOver(GameOverPayload {
                winner: Winner::Black,
                reason: "Checkmate".into(),
            }),
            now,
        );
        assert!(r.is_empty());
    }

    #[test]
    fn snapshot_with_impossible_turn_is_discarded() {
        let (mut core, now) = playing(Color::White);
        let r = core.handle_server_message(
            snapshot(
                "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
                Some(Color::Black),
            ),
            now,
        );
        assert!(matches!(
            r.events.as_slice(),
            [ChessEvent::MessageDiscarded { .. }]
        ));
        assert_eq!(*core.lifecycle(), LifecycleState::InProgress);
        assert_eq!(core.store().position(), Position::initial());
    }

    #[test]
    fn snapshot_turn_override_lets_named_side_move() {
        let (mut core, now) = playing(Color::Black);
        let r = core.handle_server_message(
            snapshot(
                "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
                Some(Color::Black),
            ),
            now,
        );
        assert!(matches!(
            r.events.as_slice(),
            [ChessEvent::SnapshotApplied { fen, turn: Color::Black }, ..] if fen.contains(" b ")
        ));
        let r = core.submit_move(mv("e7e5"), true, now);
        assert_eq!(r.outgoing, vec![ClientMessage::Move(mv("e7e5"))]);
    }

    #[test]
    fn draw_flag_ends_game() {
        let (mut core, now) = playing(Color::White);
        let ServerMessage::GameUpdate(mut payload) =
            snapshot("4k3/8/8/8/8/8/8/4K3 w - - 0 1", None)
        else {
            unreachable!()
        };
        payload.is_draw = true;
        let r = core.handle_server_message(ServerMessage::GameUpdate(payload), now);
        assert!(r.events.contains(&ChessEvent::GameOver {
            winner: Winner::Draw,
            reason: "Draw".into()
        }));
    }

    #[test]
    fn bad_snapshot_fen_is_discarded() {
        let (mut core, now) = playing(Color::White);
        let r = core.handle_server_message(snapshot("not a fen", None), now);
        assert!(matches!(
            r.events.as_slice(),
            [ChessEvent::MessageDiscarded { .. }]
        ));
        assert_eq!(core.store().position(), Position::initial());
    }

    #[test]
    fn reconnect_requests_resync_and_gates_moves() {
        let (mut core, now) = playing(Color::White);
        let r = core.on_connection_opened();
        assert_eq!(
            r.outgoing,
            vec![ClientMessage::Resync(ResyncPayload {
                game_id: Some("g1".into())
            })]
        );
        let r = core.submit_move(mv("e2e4"), true, now);
        assert!(r.events.contains(&ChessEvent::LocalMoveRejected {
            mv: mv("e2e4"),
            reason: MoveRejection::AwaitingResync
        }));

        core.handle_server_message(snapshot(&Position::initial().fen(), None), now);
        let r = core.submit_move(mv("e2e4"), true, now);
        assert_eq!(r.outgoing.len(), 1);
    }

    #[test]
    fn reopen_while_waiting_resends_pairing_request() {
        let mut core = SessionCore::new();
        core.new_game();
        assert_eq!(core.on_connection_opened().outgoing, vec![ClientMessage::InitGame {}]);
    }

    #[test]
    fn spectator_flow() {
        let now = Instant::now();
        let mut core = SessionCore::new();
        let r = core.spectate("g5");
        assert_eq!(
            r.outgoing,
            vec![ClientMessage::JoinSpectate(SpectatePayload {
                game_id: "g5".into()
            })]
        );

        let r = core.handle_server_message(snapshot(&Position::initial().fen(), None), now);
        assert!(r.events.iter().any(|e| matches!(
            e,
            ChessEvent::LifecycleChanged {
                to: LifecycleState::SpectatorWatching { .. },
                ..
            }
        )));
        assert!(core.clock().is_running());

        let r = core.submit_move(mv("e2e4"), true, now);
        assert!(r.events.contains(&ChessEvent::LocalMoveRejected {
            mv: mv("e2e4"),
            reason: MoveRejection::Spectator
        }));

        let r = core.handle_server_message(ServerMessage::Move(mv("e2e4")), now);
        assert!(matches!(
            r.events.as_slice(),
            [ChessEvent::ServerMoveApplied { .. }]
        ));

        let r = core.leave_spectate(now);
        assert_eq!(
            r.outgoing,
            vec![ClientMessage::LeaveSpectate(SpectatePayload {
                game_id: "g5".into()
            })]
        );
    }

    #[test]
    fn unexpected_messages_are_ignored() {
        let now = Instant::now();
        let mut core = SessionCore::new();
        assert!(core
            .handle_server_message(ServerMessage::Move(mv("e2e4")), now)
            .is_empty());
        assert!(core.handle_server_message(init(Color::White), now).is_empty());
        assert_eq!(*core.lifecycle(), LifecycleState::Idle);
    }

    #[test]
    fn lobby_and_errors_pass_through_any_state() {
        let now = Instant::now();
        let mut core = SessionCore::new();
        let r = core.handle_server_message(ServerMessage::GamesList(GamesListPayload::default()), now);
        assert_eq!(r.events, vec![ChessEvent::GamesList { games: vec![] }]);
        let r = core.handle_server_message(
            ServerMessage::Error(ErrorPayload {
                message: "game not found".into(),
            }),
            now,
        );
        assert_eq!(
            r.events,
            vec![ChessEvent::ServerError {
                message: "game not found".into()
            }]
        );
    }

    #[test]
    fn unreachable_then_retry_restores_game() {
        let (mut core, now) = playing(Color::White);
        let r = core.on_unreachable(now + Duration::from_secs(1));
        assert!(r.events.contains(&ChessEvent::Unreachable));
        assert_eq!(*core.lifecycle(), LifecycleState::Unreachable);
        assert!(core.tick(now + Duration::from_secs(2)).is_empty());

        core.on_retry();
        assert_eq!(*core.lifecycle(), LifecycleState::InProgress);
    }

    #[test]
    fn tick_reports_running_clock() {
        let (mut core, now) = playing(Color::White);
        match core.tick(now + Duration::from_millis(2_500)).events.as_slice() {
            [ChessEvent::Clock(reading)] => {
                assert_eq!(reading.white_ms, DEFAULT_CLOCK_MS - 2_500);
                assert_eq!(reading.black_ms, DEFAULT_CLOCK_MS);
            }
            other => panic!("expected clock event, got {other:?}"),
        }
    }

    #[test]
    fn expired_clock_is_reported_once_and_stops() {
        let (mut core, now) = playing(Color::White);
        let flag_fall = now + Duration::from_millis(DEFAULT_CLOCK_MS + 1);

        let r = core.tick(flag_fall);
        assert_eq!(
            r.events,
            vec![
                ChessEvent::Clock(ClockReading::new(0, DEFAULT_CLOCK_MS)),
                ChessEvent::ClockExpired {
                    color: Color::White
                },
            ]
        );
        assert!(r.outgoing.is_empty());
        assert!(!core.clock().is_running());
        assert!(core.tick(flag_fall + Duration::from_secs(1)).is_empty());
        assert_eq!(*core.lifecycle(), LifecycleState::InProgress);

        // The server's next word restarts the countdown.
        core.handle_server_message(
            snapshot("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1", None),
            flag_fall,
        );
        assert!(core.clock().is_running());
    }

    #[test]
    fn reset_returns_to_idle() {
        let (mut core, now) = playing(Color::White);
        core.submit_move(mv("e2e4"), true, now);
        core.reset();
        assert_eq!(*core.lifecycle(), LifecycleState::Idle);
        assert_eq!(core.store().position(), Position::initial());
        assert!(core.tick(now).is_empty());
    }
}
