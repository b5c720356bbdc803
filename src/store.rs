//! Confirmed and speculative game state.
//!
//! The store keeps two positions: the last one the server confirmed, and at
//! most one speculative position produced by a local move the server has not
//! echoed yet. Server moves are always played on the confirmed position, never
//! on the speculation, so an optimistic move can only ever be discarded, not
//! stacked on. Snapshots replace everything.

use std::time::Instant;

use tracing::{debug, warn};

use crate::clock::ClockReading;
use crate::error::MoveRejection;
use crate::lifecycle::LifecycleState;
use crate::protocol::{Color, Move, PieceKind, PlayerRole, Square, DEFAULT_CLOCK_MS};
use crate::rules::{
    AppliedMove, IllegalMove, InconsistentTurn, MoveValidator, Position, PositionStatus,
};

/// Session-level facts that are not part of the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSession {
    pub id: Option<String>,
    pub status: LifecycleState,
    pub local_role: PlayerRole,
    /// Side to move as shown to the user. Flips on an optimistic move.
    pub turn: Color,
    pub white_clock_ms: u64,
    pub black_clock_ms: u64,
    pub last_server_sync_at: Option<Instant>,
}

impl Default for GameSession {
    fn default() -> Self {
        Self {
            id: None,
            status: LifecycleState::Idle,
            local_role: PlayerRole::Spectator,
            turn: Color::White,
            white_clock_ms: DEFAULT_CLOCK_MS,
            black_clock_ms: DEFAULT_CLOCK_MS,
            last_server_sync_at: None,
        }
    }
}

/// A local pawn move onto the back rank waiting for a piece choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPromotion {
    pub from: Square,
    pub to: Square,
}

/// Result of [`GameStateStore::apply_local_move`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalMoveOutcome {
    /// Applied speculatively; the caller must transmit `applied.mv`.
    Accepted(AppliedMove),
    /// A promotion piece is needed. Nothing was applied.
    PromotionRequired(PendingPromotion),
    Rejected(MoveRejection),
}

/// Result of [`GameStateStore::apply_server_move`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMoveOutcome {
    /// No speculation was outstanding.
    Applied(AppliedMove),
    /// The server confirmed exactly the speculative position.
    Converged(AppliedMove),
    /// The server's move replaced a different speculative move.
    Overridden {
        speculated: AppliedMove,
        authoritative: AppliedMove,
    },
    /// The move is illegal on the confirmed position. Nothing changed.
    Rejected(IllegalMove),
}

/// Result of [`GameStateStore::apply_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub turn: Color,
    /// The server's turn disagreed with the FEN's side to move.
    pub turn_overridden: bool,
    /// Speculative move thrown away by the snapshot.
    pub discarded: Option<AppliedMove>,
    pub status: PositionStatus,
}

/// Owner of the board state for one session.
#[derive(Debug, Clone, Default)]
pub struct GameStateStore {
    validator: MoveValidator,
    confirmed: Position,
    speculation: Option<AppliedMove>,
    history: Vec<AppliedMove>,
    pending_promotion: Option<PendingPromotion>,
    awaiting_resync: bool,
    session: GameSession,
}

impl GameStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Session setup ───────────────────────────────────────────────

    /// Start a fresh game as `color` from the initial position.
    pub fn begin_game(
        &mut self,
        color: Color,
        game_id: Option<String>,
        clocks: ClockReading,
        now: Instant,
    ) {
        self.clear_board(Position::initial());
        self.session.id = game_id;
        self.session.local_role = PlayerRole::from(color);
        self.session.turn = Color::White;
        self.set_clocks(clocks, now);
    }

    /// Prepare to watch `game_id`. The board stays at the initial position
    /// until the first snapshot arrives.
    pub fn begin_spectating(&mut self, game_id: &str) {
        self.clear_board(Position::initial());
        self.session.id = Some(game_id.to_owned());
        self.session.local_role = PlayerRole::Spectator;
        self.session.turn = Color::White;
    }

    /// Mirror the lifecycle state used for move gating.
    pub fn set_status(&mut self, status: LifecycleState) {
        self.session.status = status;
    }

    /// Refuse local moves until the next snapshot.
    pub fn mark_awaiting_resync(&mut self) {
        self.awaiting_resync = true;
        self.pending_promotion = None;
    }

    /// Back to an idle store at the initial position.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Try a move made by the local player.
    ///
    /// A pawn move onto the back rank without a piece records a promotion
    /// marker and applies nothing; resubmitting the same squares with a piece
    /// (or calling [`resolve_promotion`](Self::resolve_promotion)) completes it.
    pub fn apply_local_move(&mut self, mv: Move) -> LocalMoveOutcome {
        if let Err(reason) = self.check_can_move() {
            return LocalMoveOutcome::Rejected(reason);
        }

        if let Some(pending) = self.pending_promotion {
            let completes =
                pending.from == mv.from && pending.to == mv.to && mv.promotion.is_some();
            if !completes {
                return LocalMoveOutcome::Rejected(MoveRejection::PromotionPending);
            }
        }

        let current = self.position();
        if mv.promotion.is_none() && self.validator.needs_promotion(&current, mv.from, mv.to) {
            let pending = PendingPromotion {
                from: mv.from,
                to: mv.to,
            };
            self.pending_promotion = Some(pending);
            return LocalMoveOutcome::PromotionRequired(pending);
        }

        match self.validator.validate(&current, mv) {
            Ok(applied) => {
                self.pending_promotion = None;
                self.session.turn = applied.position.turn();
                self.speculation = Some(applied.clone());
                LocalMoveOutcome::Accepted(applied)
            }
            Err(_) => LocalMoveOutcome::Rejected(MoveRejection::IllegalMove),
        }
    }

    /// Complete a pending promotion with `piece`.
    pub fn resolve_promotion(&mut self, piece: PieceKind) -> LocalMoveOutcome {
        match self.pending_promotion {
            Some(pending) => {
                self.apply_local_move(Move::new(pending.from, pending.to).with_promotion(piece))
            }
            None => LocalMoveOutcome::Rejected(MoveRejection::NoPendingPromotion),
        }
    }

    /// Drop a pending promotion without moving.
    pub fn cancel_promotion(&mut self) -> Option<PendingPromotion> {
        self.pending_promotion.take()
    }

    /// Apply a move broadcast by the server.
    ///
    /// The move is played on the confirmed position. Any speculation is
    /// discarded either way; the outcome says whether it matched.
    pub fn apply_server_move(&mut self, mv: Move) -> ServerMoveOutcome {
        let applied = match self.validator.validate(&self.confirmed, mv) {
            Ok(applied) => applied,
            Err(err) => {
                warn!(
                    %mv,
                    fen = %self.confirmed.fen(),
                    "server move is illegal on the confirmed position; waiting for a snapshot"
                );
                return ServerMoveOutcome::Rejected(err);
            }
        };

        self.confirmed = applied.position;
        self.history.push(applied.clone());
        self.pending_promotion = None;
        self.session.turn = self.confirmed.turn();

        match self.speculation.take() {
            None => ServerMoveOutcome::Applied(applied),
            Some(speculated) if speculated.position == applied.position => {
                debug!(san = %applied.san, "speculative move confirmed");
                ServerMoveOutcome::Converged(applied)
            }
            Some(speculated) => {
                debug!(
                    speculated = %speculated.san,
                    authoritative = %applied.san,
                    "speculative move overridden by server"
                );
                ServerMoveOutcome::Overridden {
                    speculated,
                    authoritative: applied,
                }
            }
        }
    }

    /// Replace the whole state with an authoritative snapshot.
    ///
    /// `turn` wins over the position's own side to move when both are given
    /// and disagree: the confirmed position is rebuilt with the server's side
    /// to move. History is kept only if the snapshot matches the confirmed
    /// position.
    ///
    /// # Errors
    ///
    /// Returns [`InconsistentTurn`] when the server's side to move cannot be
    /// applied to the FEN. Nothing changes in that case.
    pub fn apply_snapshot(
        &mut self,
        position: Position,
        turn: Option<Color>,
        clocks: ClockReading,
        now: Instant,
    ) -> Result<SnapshotOutcome, InconsistentTurn> {
        let derived = position.turn();
        let turn = turn.unwrap_or(derived);
        let turn_overridden = turn != derived;
        let position = position.with_side_to_move(turn).inspect_err(|err| {
            warn!(error = %err, "discarding snapshot with impossible side to move");
        })?;
        if turn_overridden {
            warn!(server = %turn, fen = %position.fen(), "snapshot turn disagrees with FEN");
        }

        let discarded = self.speculation.take();
        self.pending_promotion = None;
        self.awaiting_resync = false;

        if position != self.confirmed {
            self.history.clear();
        }
        self.confirmed = position;
        self.session.turn = turn;
        self.set_clocks(clocks, now);

        Ok(SnapshotOutcome {
            turn,
            turn_overridden,
            discarded,
            status: position.status(),
        })
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// The position to display: speculative if one is outstanding.
    pub fn position(&self) -> Position {
        self.speculation
            .as_ref()
            .map_or(self.confirmed, |s| s.position)
    }

    /// The last server-confirmed position.
    pub fn confirmed_position(&self) -> Position {
        self.confirmed
    }

    pub fn speculation(&self) -> Option<&AppliedMove> {
        self.speculation.as_ref()
    }

    pub fn pending_promotion(&self) -> Option<PendingPromotion> {
        self.pending_promotion
    }

    pub fn is_awaiting_resync(&self) -> bool {
        self.awaiting_resync
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub fn turn(&self) -> Color {
        self.session.turn
    }

    /// Clocks from the last authoritative update.
    pub fn clocks(&self) -> ClockReading {
        ClockReading::new(self.session.white_clock_ms, self.session.black_clock_ms)
    }

    /// Confirmed moves since the game started or the last diverging snapshot.
    pub fn history(&self) -> &[AppliedMove] {
        &self.history
    }

    /// [`history`](Self::history) as SAN strings.
    pub fn san_history(&self) -> Vec<String> {
        self.history.iter().map(|m| m.san.clone()).collect()
    }

    /// Where the piece on `from` may go in the displayed position.
    pub fn legal_destinations(&self, from: Square) -> Vec<Square> {
        self.validator.legal_destinations(&self.position(), from)
    }

    fn check_can_move(&self) -> Result<(), MoveRejection> {
        if self.session.status.is_spectating() {
            return Err(MoveRejection::Spectator);
        }
        if !self.session.status.accepts_moves() {
            return Err(MoveRejection::NotInProgress);
        }
        let Some(color) = self.session.local_role.color() else {
            return Err(MoveRejection::Spectator);
        };
        if self.awaiting_resync {
            return Err(MoveRejection::AwaitingResync);
        }
        if color != self.session.turn {
            return Err(MoveRejection::NotYourTurn);
        }
        Ok(())
    }

    fn clear_board(&mut self, position: Position) {
        self.confirmed = position;
        self.speculation = None;
        self.history.clear();
        self.pending_promotion = None;
        self.awaiting_resync = false;
    }

    fn set_clocks(&mut self, clocks: ClockReading, now: Instant) {
        self.session.white_clock_ms = clocks.white_ms;
        self.session.black_clock_ms = clocks.black_ms;
        self.session.last_server_sync_at = Some(now);
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

    fn mv(s: &str) -> Move {
        s.parse().unwrap()
    }

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    fn clocks() -> ClockReading {
        ClockReading::new(DEFAULT_CLOCK_MS, DEFAULT_CLOCK_MS)
    }

    fn playing_as(color: Color) -> GameStateStore {
        let mut store = GameStateStore::new();
        store.begin_game(color, Some("g1".into()), clocks(), Instant::now());
        store.set_status(LifecycleState::InProgress);
        store
    }

    fn playing_from(fen: &str, color: Color) -> GameStateStore {
        let mut store = playing_as(color);
        store
            .apply_snapshot(Position::from_fen(fen).unwrap(), None, clocks(), Instant::now())
            .unwrap();
        store
    }

    #[test]
    fn local_move_is_speculative_until_echoed() {
        let mut store = playing_as(Color::White);
        let outcome = store.apply_local_move(mv("e2e4"));
        let LocalMoveOutcome::Accepted(applied) = outcome else {
            panic!("expected Accepted, got {outcome:?}");
        };
        assert_eq!(applied.san, "e4");
        assert_eq!(store.turn(), Color::Black);
        assert_eq!(store.confirmed_position(), Position::initial());
        assert_ne!(store.position(), Position::initial());

        match store.apply_server_move(mv("e2e4")) {
            ServerMoveOutcome::Converged(confirmed) => assert_eq!(confirmed.san, "e4"),
            other => panic!("expected Converged, got {other:?}"),
        }
        assert!(store.speculation().is_none());
        assert_eq!(store.position(), store.confirmed_position());
        assert_eq!(store.san_history(), vec!["e4"]);
    }

    #[test]
    fn server_move_overrides_mismatched_speculation() {
        let mut store = playing_as(Color::White);
        assert!(matches!(
            store.apply_local_move(mv("e2e4")),
            LocalMoveOutcome::Accepted(_)
        ));

        match store.apply_server_move(mv("d2d4")) {
            ServerMoveOutcome::Overridden {
                speculated,
                authoritative,
            } => {
                assert_eq!(speculated.san, "e4");
                assert_eq!(authoritative.san, "d4");
            }
            other => panic!("expected Overridden, got {other:?}"),
        }
        assert_eq!(store.position(), store.confirmed_position());
        assert_eq!(store.san_history(), vec!["d4"]);
    }

    #[test]
    fn opponent_move_applies_directly() {
        let mut store = playing_as(Color::White);
        store.apply_local_move(mv("e2e4"));
        store.apply_server_move(mv("e2e4"));

        match store.apply_server_move(mv("a7a5")) {
            ServerMoveOutcome::Applied(applied) => assert_eq!(applied.color, Color::Black),
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(store.turn(), Color::White);
    }

    #[test]
    fn rejects_moves_out_of_turn() {
        let mut store = playing_as(Color::Black);
        assert_eq!(
            store.apply_local_move(mv("e7e5")),
            LocalMoveOutcome::Rejected(MoveRejection::NotYourTurn)
        );
        assert_eq!(store.position(), Position::initial());
    }

    #[test]
    fn rejects_second_move_while_speculating() {
        let mut store = playing_as(Color::White);
        store.apply_local_move(mv("e2e4"));
        assert_eq!(
            store.apply_local_move(mv("d2d4")),
            LocalMoveOutcome::Rejected(MoveRejection::NotYourTurn)
        );
    }

    #[test]
    fn rejects_illegal_move_without_mutation() {
        let mut store = playing_as(Color::White);
        assert_eq!(
            store.apply_local_move(mv("e2e5")),
            LocalMoveOutcome::Rejected(MoveRejection::IllegalMove)
        );
        assert!(store.speculation().is_none());
        assert_eq!(store.turn(), Color::White);
    }

    #[test]
    fn rejects_moves_outside_a_game() {
        let mut store = GameStateStore::new();
        assert_eq!(
            store.apply_local_move(mv("e2e4")),
            LocalMoveOutcome::Rejected(MoveRejection::NotInProgress)
        );

        store.begin_spectating("g9");
        store.set_status(LifecycleState::SpectatorWatching {
            game_id: "g9".into(),
        });
        assert_eq!(
            store.apply_local_move(mv("e2e4")),
            LocalMoveOutcome::Rejected(MoveRejection::Spectator)
        );
    }

    #[test]
    fn promotion_requires_a_piece() {
        let mut store = playing_from("7k/P7/8/8/8/8/8/K7 w - - 0 1", Color::White);

        let outcome = store.apply_local_move(mv("a7a8"));
        assert_eq!(
            outcome,
            LocalMoveOutcome::PromotionRequired(PendingPromotion {
                from: sq("a7"),
                to: sq("a8")
            })
        );
        assert!(store.speculation().is_none());
        assert_eq!(store.turn(), Color::White);

        assert_eq!(
            store.apply_local_move(mv("a1b1")),
            LocalMoveOutcome::Rejected(MoveRejection::PromotionPending)
        );

        match store.resolve_promotion(PieceKind::Knight) {
            LocalMoveOutcome::Accepted(applied) => {
                assert_eq!(applied.mv, mv("a7a8n"));
                assert_eq!(applied.san, "a8=N");
            }
            other => panic!("expected Accepted, got {other:?}"),
        }
        assert!(store.pending_promotion().is_none());
    }

    #[test]
    fn promotion_can_be_completed_by_resubmitting() {
        let mut store = playing_from("7k/P7/8/8/8/8/8/K7 w - - 0 1", Color::White);
        store.apply_local_move(mv("a7a8"));
        assert!(matches!(
            store.apply_local_move(mv("a7a8q")),
            LocalMoveOutcome::Accepted(_)
        ));
    }

    #[test]
    fn resolve_without_pending_promotion_is_rejected() {
        let mut store = playing_as(Color::White);
        assert_eq!(
            store.resolve_promotion(PieceKind::Queen),
            LocalMoveOutcome::Rejected(MoveRejection::NoPendingPromotion)
        );
    }

    #[test]
    fn illegal_server_move_leaves_store_unchanged() {
        let mut store = playing_as(Color::White);
        store.apply_local_move(mv("e2e4"));
        let before = store.position();

        assert!(matches!(
            store.apply_server_move(mv("e2e5")),
            ServerMoveOutcome::Rejected(_)
        ));
        assert_eq!(store.position(), before);
        assert!(store.speculation().is_some());
        assert!(store.history().is_empty());
    }

    #[test]
    fn snapshot_replaces_everything() {
        let mut store = playing_as(Color::White);
        store.apply_local_move(mv("e2e4"));

        let fen = "rnbqkbnr/pppp1ppp/8/4p3/3P4/8/PPP1PPPP/RNBQKBNR w KQkq - 0 1";
        let outcome = store.apply_snapshot(
            Position::from_fen(fen).unwrap(),
            Some(Color::White),
            ClockReading::new(590_000, 580_000),
            Instant::now(),
        )
        .unwrap();
        assert_eq!(outcome.discarded.map(|m| m.san), Some("e4".to_string()));
        assert!(!outcome.turn_overridden);
        assert_eq!(store.position().fen(), fen);
        assert_eq!(store.clocks(), ClockReading::new(590_000, 580_000));
        assert!(store.history().is_empty());
        assert!(store.session().last_server_sync_at.is_some());
    }

    #[test]
    fn snapshot_turn_wins_over_fen() {
        let mut store = playing_as(Color::Black);
        let outcome = store
            .apply_snapshot(Position::initial(), Some(Color::Black), clocks(), Instant::now())
            .unwrap();
        assert!(outcome.turn_overridden);
        assert_eq!(store.turn(), Color::Black);
        assert_eq!(store.confirmed_position().turn(), Color::Black);
        assert!(matches!(
            store.apply_local_move(mv("e7e5")),
            LocalMoveOutcome::Accepted(_)
        ));
    }

    #[test]
    fn snapshot_turn_that_puts_side_in_check_is_refused() {
        let mut store = playing_as(Color::White);
        let before = store.position();
        let synced_at = store.session().last_server_sync_at;
        // White is mated; black cannot be to move with the white king attacked.
        let mate = Position::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
            .unwrap();

        let err = store
            .apply_snapshot(mate, Some(Color::Black), ClockReading::new(1, 2), Instant::now())
            .unwrap_err();
        assert_eq!(err.turn, Color::Black);
        assert_eq!(store.position(), before);
        assert_eq!(store.turn(), Color::White);
        assert_eq!(store.clocks(), clocks());
        assert_eq!(store.session().last_server_sync_at, synced_at);
    }

    #[test]
    fn matching_snapshot_keeps_history() {
        let mut store = playing_as(Color::White);
        store.apply_local_move(mv("e2e4"));
        store.apply_server_move(mv("e2e4"));
        let confirmed = store.confirmed_position();

        store.apply_snapshot(confirmed, None, clocks(), Instant::now()).unwrap();
        assert_eq!(store.san_history(), vec!["e4"]);
    }

    #[test]
    fn snapshot_reports_terminal_status() {
        let mut store = playing_as(Color::White);
        let mate = Position::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
            .unwrap();
        let outcome = store.apply_snapshot(mate, None, clocks(), Instant::now()).unwrap();
        assert_eq!(
            outcome.status,
            PositionStatus::Checkmate {
                winner: Color::Black
            }
        );
    }

    #[test]
    fn resync_gate_holds_until_snapshot() {
        let mut store = playing_as(Color::White);
        store.mark_awaiting_resync();
        assert_eq!(
            store.apply_local_move(mv("e2e4")),
            LocalMoveOutcome::Rejected(MoveRejection::AwaitingResync)
        );

        store
            .apply_snapshot(Position::initial(), None, clocks(), Instant::now())
            .unwrap();
        assert!(matches!(
            store.apply_local_move(mv("e2e4")),
            LocalMoveOutcome::Accepted(_)
        ));
    }

    #[test]
    fn legal_destinations_follow_displayed_position() {
        let store = playing_as(Color::White);
        assert_eq!(store.legal_destinations(sq("b1")), vec![sq("a3"), sq("c3")]);
    }

    /// Small deterministic generator for move sequences.
    struct Lcg(u64);

    impl Lcg {
        fn pick(&mut self, len: usize) -> usize {
            self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            ((self.0 >> 33) as usize) % len
        }
    }

    #[test]
    fn echoed_local_moves_match_plain_replay() {
        let validator = MoveValidator::new();
        for seed in 1..=8u64 {
            let mut rng = Lcg(seed);
            let mut store = playing_as(Color::White);
            let mut replay = Position::initial();

            for _ in 0..60 {
                let legal = validator.legal_moves(&replay);
                if legal.is_empty() {
                    break;
                }
                let chosen = legal[rng.pick(legal.len())];

                if replay.turn() == Color::White {
                    let outcome = store.apply_local_move(chosen);
                    assert!(
                        matches!(outcome, LocalMoveOutcome::Accepted(_)),
                        "seed {seed}: {chosen} gave {outcome:?}"
                    );
                    assert!(matches!(
                        store.apply_server_move(chosen),
                        ServerMoveOutcome::Converged(_)
                    ));
                } else {
                    assert!(matches!(
                        store.apply_server_move(chosen),
                        ServerMoveOutcome::Applied(_)
                    ));
                }

                replay = validator.validate(&replay, chosen).unwrap().position;
                assert_eq!(store.confirmed_position(), replay);
                assert_eq!(store.position(), replay);
                assert!(store.speculation().is_none());
            }
        }
    }
}
