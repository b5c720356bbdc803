//! Events delivered to the application.

use std::time::Duration;

use crate::clock::ClockReading;
use crate::error::MoveRejection;
use crate::lifecycle::LifecycleState;
use crate::protocol::{Color, GameSummary, Move, Square, Winner};
use crate::rules::AppliedMove;

/// Everything the client reports back to the application.
///
/// Failures inside the synchronization core are reported here rather than
/// returned as errors: a rejected move, a discarded message, or an exhausted
/// reconnection budget is a normal event, not a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum ChessEvent {
    // ── Connectivity ────────────────────────────────────────────────
    /// The first connection opened.
    Connected,
    /// A connection opened after an earlier one was lost.
    Reconnected,
    /// The connection closed.
    Disconnected { code: u16, reason: String },
    /// A reconnection attempt will be made after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The reconnection budget is spent. Call `retry` or `reset`.
    Unreachable,

    // ── Lifecycle ───────────────────────────────────────────────────
    LifecycleChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    /// The server paired us and assigned a color.
    GameStarted {
        color: Color,
        game_id: Option<String>,
        white_ms: u64,
        black_ms: u64,
    },
    GameOver { winner: Winner, reason: String },

    // ── Board ───────────────────────────────────────────────────────
    /// A local move was applied speculatively and sent.
    LocalMoveAccepted { applied: AppliedMove },
    LocalMoveRejected { mv: Move, reason: MoveRejection },
    /// Pick a promotion piece for this move.
    PromotionRequired { from: Square, to: Square },
    /// A server move was applied to the confirmed position.
    ServerMoveApplied { applied: AppliedMove },
    /// The server's move differed from our speculative one.
    ReconciliationOverride {
        speculated: AppliedMove,
        authoritative: AppliedMove,
    },
    /// The server broadcast a move that is illegal on the confirmed position.
    ServerMoveRejected { mv: Move },
    /// An authoritative snapshot replaced the board.
    SnapshotApplied { fen: String, turn: Color },
    /// Periodic local clock estimate.
    Clock(ClockReading),
    /// The local estimate for `color` reached zero.
    ClockExpired { color: Color },

    // ── Lobby and diagnostics ───────────────────────────────────────
    GamesList { games: Vec<GameSummary> },
    ServerError { message: String },
    /// An inbound message failed validation and was dropped.
    MessageDiscarded { error: String },

    /// The client has shut down. Always the last event.
    Shutdown,
}
