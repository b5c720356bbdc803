//! Game lifecycle state machine.
//!
//! Every method returns the transition it made, or `None` when the input is
//! not valid in the current state. Invalid inputs are ignored rather than
//! treated as faults, so duplicate or late messages cannot wedge the machine.

use std::fmt;

use tracing::debug;

use crate::protocol::{ServerMessage, Winner};

/// Phase of the local client's involvement in a game.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Not in any game.
    #[default]
    Idle,
    /// A new game was requested; waiting for the server to pair us.
    WaitingForOpponent,
    /// Playing. The only state in which local moves are accepted.
    InProgress,
    /// The game ended.
    GameOver { winner: Winner, reason: String },
    /// Asked to watch a game; no state received yet.
    SpectatorJoined { game_id: String },
    /// Watching a game with live updates.
    SpectatorWatching { game_id: String },
    /// The watched game ended or we stopped watching.
    SpectatorSessionEnded { game_id: String },
    /// Reconnection budget exhausted. Needs an explicit retry or reset.
    Unreachable,
}

impl LifecycleState {
    /// Local moves are only accepted while a game is in progress.
    pub fn accepts_moves(&self) -> bool {
        *self == Self::InProgress
    }

    /// Whether this state is one of the spectator states.
    pub fn is_spectating(&self) -> bool {
        matches!(
            self,
            Self::SpectatorJoined { .. } | Self::SpectatorWatching { .. }
        )
    }

    /// Game being watched, if spectating.
    pub fn spectated_game(&self) -> Option<&str> {
        match self {
            Self::SpectatorJoined { game_id }
            | Self::SpectatorWatching { game_id }
            | Self::SpectatorSessionEnded { game_id } => Some(game_id),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::WaitingForOpponent => f.write_str("waiting for opponent"),
            Self::InProgress => f.write_str("in progress"),
            Self::GameOver { winner, reason } => write!(f, "game over ({winner:?}, {reason})"),
            Self::SpectatorJoined { game_id } => write!(f, "joined {game_id} as spectator"),
            Self::SpectatorWatching { game_id } => write!(f, "watching {game_id}"),
            Self::SpectatorSessionEnded { game_id } => write!(f, "stopped watching {game_id}"),
            Self::Unreachable => f.write_str("server unreachable"),
        }
    }
}

/// A change of lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// Owner of the current [`LifecycleState`].
#[derive(Debug, Clone, Default)]
pub struct GameLifecycle {
    state: LifecycleState,
    /// State to return to when leaving `Unreachable` through a retry.
    suspended: Option<LifecycleState>,
}

impl GameLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Whether an inbound message makes sense in the current state.
    pub fn expects(&self, message: &ServerMessage) -> bool {
        use LifecycleState as S;
        match message {
            ServerMessage::InitGame(_) => self.state == S::WaitingForOpponent,
            ServerMessage::Move(_) | ServerMessage::GameOver(_) => {
                self.state == S::InProgress || self.state.is_spectating()
            }
            ServerMessage::GameUpdate(_) => matches!(
                self.state,
                S::WaitingForOpponent
                    | S::InProgress
                    | S::SpectatorJoined { .. }
                    | S::SpectatorWatching { .. }
            ),
            ServerMessage::GamesList(_) | ServerMessage::Error(_) => true,
        }
    }

    /// Idle → WaitingForOpponent.
    pub fn request_new_game(&mut self) -> Option<LifecycleTransition> {
        match self.state {
            LifecycleState::Idle => self.move_to(LifecycleState::WaitingForOpponent),
            _ => self.ignore("new game request"),
        }
    }

    /// WaitingForOpponent → InProgress.
    pub fn on_init_ack(&mut self) -> Option<LifecycleTransition> {
        match self.state {
            LifecycleState::WaitingForOpponent => self.move_to(LifecycleState::InProgress),
            _ => self.ignore("game start acknowledgment"),
        }
    }

    /// InProgress → GameOver, or a spectator state → SpectatorSessionEnded.
    ///
    /// Used both for explicit game-over notices and for terminal positions
    /// confirmed by an authoritative snapshot.
    pub fn on_game_over(&mut self, winner: Winner, reason: &str) -> Option<LifecycleTransition> {
        match &self.state {
            LifecycleState::InProgress => self.move_to(LifecycleState::GameOver {
                winner,
                reason: reason.to_owned(),
            }),
            LifecycleState::SpectatorJoined { game_id }
            | LifecycleState::SpectatorWatching { game_id } => {
                let game_id = game_id.clone();
                self.move_to(LifecycleState::SpectatorSessionEnded { game_id })
            }
            _ => self.ignore("game over"),
        }
    }

    /// Idle → SpectatorJoined.
    pub fn request_spectate(&mut self, game_id: &str) -> Option<LifecycleTransition> {
        match self.state {
            LifecycleState::Idle => self.move_to(LifecycleState::SpectatorJoined {
                game_id: game_id.to_owned(),
            }),
            _ => self.ignore("spectate request"),
        }
    }

    /// SpectatorJoined → SpectatorWatching, on the first state received.
    pub fn on_spectator_state(&mut self) -> Option<LifecycleTransition> {
        match &self.state {
            LifecycleState::SpectatorJoined { game_id } => {
                let game_id = game_id.clone();
                self.move_to(LifecycleState::SpectatorWatching { game_id })
            }
            _ => None,
        }
    }

    /// A spectator state → SpectatorSessionEnded.
    pub fn request_leave_spectate(&mut self) -> Option<LifecycleTransition> {
        match &self.state {
            LifecycleState::SpectatorJoined { game_id }
            | LifecycleState::SpectatorWatching { game_id } => {
                let game_id = game_id.clone();
                self.move_to(LifecycleState::SpectatorSessionEnded { game_id })
            }
            _ => self.ignore("leave spectate request"),
        }
    }

    /// Any state → Unreachable, remembering where we were.
    pub fn on_unreachable(&mut self) -> Option<LifecycleTransition> {
        if self.state == LifecycleState::Unreachable {
            return None;
        }
        self.suspended = Some(self.state.clone());
        self.move_to(LifecycleState::Unreachable)
    }

    /// Unreachable → the state held before the connection was lost.
    pub fn on_retry(&mut self) -> Option<LifecycleTransition> {
        match self.state {
            LifecycleState::Unreachable => {
                let previous = self.suspended.take().unwrap_or_default();
                self.move_to(previous)
            }
            _ => None,
        }
    }

    /// Any state → Idle.
    pub fn reset(&mut self) -> Option<LifecycleTransition> {
        self.suspended = None;
        if self.state == LifecycleState::Idle {
            return None;
        }
        self.move_to(LifecycleState::Idle)
    }

    fn move_to(&mut self, to: LifecycleState) -> Option<LifecycleTransition> {
        let from = std::mem::replace(&mut self.state, to.clone());
        debug!(%from, %to, "lifecycle transition");
        Some(LifecycleTransition { from, to })
    }

    fn ignore(&self, input: &str) -> Option<LifecycleTransition> {
        debug!(state = %self.state, input, "ignoring lifecycle input");
        None
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
    use crate::protocol::{ErrorPayload, GamesListPayload, Move};

    #[test]
    fn player_happy_path() {
        let mut lc = GameLifecycle::new();
        assert!(!lc.state().accepts_moves());

        let t = lc.request_new_game().unwrap();
        assert_eq!(t.from, LifecycleState::Idle);
        assert_eq!(t.to, LifecycleState::WaitingForOpponent);

        lc.on_init_ack().unwrap();
        assert!(lc.state().accepts_moves());

        let t = lc.on_game_over(Winner::Black, "Checkmate").unwrap();
        assert_eq!(
            t.to,
            LifecycleState::GameOver {
                winner: Winner::Black,
                reason: "Checkmate".into()
            }
        );
        assert!(!lc.state().accepts_moves());

        lc.reset().unwrap();
        assert_eq!(*lc.state(), LifecycleState::Idle);
    }

    #[test]
    fn invalid_inputs_are_no_ops() {
        let mut lc = GameLifecycle::new();
        assert!(lc.on_init_ack().is_none());
        assert!(lc.on_game_over(Winner::Draw, "Draw").is_none());
        assert!(lc.request_leave_spectate().is_none());
        assert!(lc.reset().is_none());

        lc.request_new_game().unwrap();
        assert!(lc.request_new_game().is_none());
        assert!(lc.request_spectate("g1").is_none());
        assert_eq!(*lc.state(), LifecycleState::WaitingForOpponent);
    }

    #[test]
    fn spectator_path() {
        let mut lc = GameLifecycle::new();
        lc.request_spectate("g7").unwrap();
        assert!(lc.state().is_spectating());
        assert!(!lc.state().accepts_moves());

        let t = lc.on_spectator_state().unwrap();
        assert_eq!(t.to, LifecycleState::SpectatorWatching { game_id: "g7".into() });
        assert!(lc.on_spectator_state().is_none());

        let t = lc.on_game_over(Winner::White, "Checkmate").unwrap();
        assert_eq!(
            t.to,
            LifecycleState::SpectatorSessionEnded { game_id: "g7".into() }
        );
        assert_eq!(lc.state().spectated_game(), Some("g7"));
    }

    #[test]
    fn leaving_spectate_ends_session() {
        let mut lc = GameLifecycle::new();
        lc.request_spectate("g2").unwrap();
        let t = lc.request_leave_spectate().unwrap();
        assert_eq!(
            t.to,
            LifecycleState::SpectatorSessionEnded { game_id: "g2".into() }
        );
    }

    #[test]
    fn unreachable_and_retry_restore_previous_state() {
        let mut lc = GameLifecycle::new();
        lc.request_new_game().unwrap();
        lc.on_init_ack().unwrap();

        let t = lc.on_unreachable().unwrap();
        assert_eq!(t.from, LifecycleState::InProgress);
        assert!(lc.on_unreachable().is_none());
        assert!(!lc.state().accepts_moves());

        let t = lc.on_retry().unwrap();
        assert_eq!(t.to, LifecycleState::InProgress);
        assert!(lc.on_retry().is_none());
    }

    #[test]
    fn reset_from_unreachable_forgets_suspended_state() {
        let mut lc = GameLifecycle::new();
        lc.request_spectate("g3").unwrap();
        lc.on_unreachable().unwrap();
        lc.reset().unwrap();
        assert!(lc.on_retry().is_none());
        assert_eq!(*lc.state(), LifecycleState::Idle);
    }

    #[test]
    fn message_gating() {
        let mut lc = GameLifecycle::new();
        let mv = ServerMessage::Move(Move::new("e2".parse().unwrap(), "e4".parse().unwrap()));
        let list = ServerMessage::GamesList(GamesListPayload::default());
        let err = ServerMessage::Error(ErrorPayload {
            message: "nope".into(),
        });

        assert!(!lc.expects(&mv));
        assert!(lc.expects(&list));
        assert!(lc.expects(&err));

        lc.request_new_game().unwrap();
        lc.on_init_ack().unwrap();
        assert!(lc.expects(&mv));
    }
}
