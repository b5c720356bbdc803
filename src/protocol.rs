//! Wire-compatible protocol types for the chess game server.
//!
//! Every message is an envelope `{"type": <TAG>, "payload": {...}}`. Both
//! directions are modelled as adjacently-tagged enums so serde produces and
//! checks the envelope shape directly. Tags are `SCREAMING_SNAKE_CASE`;
//! spellings used by older server builds are accepted as aliases when
//! decoding. Payload fields are camelCase.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Starting clock for each side when the server does not send one (10 minutes).
pub const DEFAULT_CLOCK_MS: u64 = 600_000;

fn default_clock_ms() -> u64 {
    DEFAULT_CLOCK_MS
}

// ── Board coordinates ───────────────────────────────────────────────

/// A string that is not a valid algebraic square.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid square {0:?}")]
pub struct InvalidSquare(pub String);

/// A string that is not a valid coordinate move (`e2e4`, `e7e8q`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid move {0:?}")]
pub struct InvalidMoveText(pub String);

/// One of the 64 board squares, file a–h × rank 1–8.
///
/// Serialized as lowercase algebraic notation (`"e4"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Square(u8);

impl Square {
    /// Build a square from zero-based file (0 = a) and rank (0 = rank 1).
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        (file < 8 && rank < 8).then(|| Self(rank * 8 + file))
    }

    /// Zero-based file index (0 = a).
    pub fn file(self) -> u8 {
        self.0 % 8
    }

    /// Zero-based rank index (0 = rank 1).
    pub fn rank(self) -> u8 {
        self.0 / 8
    }

    /// Index in `0..64`, a1 = 0, h8 = 63.
    pub fn index(self) -> u8 {
        self.0
    }

    /// Square from an a1 = 0 index, wrapped into range.
    pub(crate) fn from_wrapped_index(index: usize) -> Self {
        Self((index % 64) as u8)
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            char::from(b'a' + self.file()),
            char::from(b'1' + self.rank())
        )
    }
}

impl FromStr for Square {
    type Err = InvalidSquare;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            [file @ b'a'..=b'h', rank @ b'1'..=b'8'] => Square::new(file - b'a', rank - b'1')
                .ok_or_else(|| InvalidSquare(s.to_string())),
            _ => Err(InvalidSquare(s.to_string())),
        }
    }
}

impl TryFrom<String> for Square {
    type Error = InvalidSquare;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Square> for String {
    fn from(square: Square) -> Self {
        square.to_string()
    }
}

// ── Pieces and sides ────────────────────────────────────────────────

/// Piece a pawn may promote to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    #[serde(rename = "q", alias = "Q", alias = "queen")]
    Queen,
    #[serde(rename = "r", alias = "R", alias = "rook")]
    Rook,
    #[serde(rename = "b", alias = "B", alias = "bishop")]
    Bishop,
    #[serde(rename = "n", alias = "N", alias = "knight")]
    Knight,
}

impl PieceKind {
    /// The four promotion choices, strongest first.
    pub const PROMOTIONS: [PieceKind; 4] = [
        PieceKind::Queen,
        PieceKind::Rook,
        PieceKind::Bishop,
        PieceKind::Knight,
    ];

    /// Lowercase coordinate-notation suffix (`q`, `r`, `b`, `n`).
    pub fn as_char(self) -> char {
        match self {
            PieceKind::Queen => 'q',
            PieceKind::Rook => 'r',
            PieceKind::Bishop => 'b',
            PieceKind::Knight => 'n',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'q' => Some(PieceKind::Queen),
            'r' => Some(PieceKind::Rook),
            'b' => Some(PieceKind::Bishop),
            'n' => Some(PieceKind::Knight),
            _ => None,
        }
    }
}

/// Side of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    #[serde(rename = "white", alias = "w", alias = "White", alias = "WHITE")]
    White,
    #[serde(rename = "black", alias = "b", alias = "Black", alias = "BLACK")]
    Black,
}

impl Color {
    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Color::White => "white",
            Color::Black => "black",
        })
    }
}

/// The local participant's role in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlayerRole {
    White,
    Black,
    /// Read-only observer. Never allowed to move.
    #[default]
    Spectator,
}

impl PlayerRole {
    /// The color this role plays, if any.
    pub fn color(self) -> Option<Color> {
        match self {
            PlayerRole::White => Some(Color::White),
            PlayerRole::Black => Some(Color::Black),
            PlayerRole::Spectator => None,
        }
    }

    /// Which side should be drawn at the bottom of the board.
    pub fn board_orientation(self) -> Color {
        self.color().unwrap_or(Color::White)
    }
}

impl From<Color> for PlayerRole {
    fn from(color: Color) -> Self {
        match color {
            Color::White => PlayerRole::White,
            Color::Black => PlayerRole::Black,
        }
    }
}

/// Winner field of a game-over notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    #[serde(rename = "white", alias = "w", alias = "White", alias = "WHITE")]
    White,
    #[serde(rename = "black", alias = "b", alias = "Black", alias = "BLACK")]
    Black,
    #[serde(rename = "draw", alias = "Draw", alias = "DRAW", alias = "none")]
    Draw,
}

impl From<Color> for Winner {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Winner::White,
            Color::Black => Winner::Black,
        }
    }
}

// ── Moves ───────────────────────────────────────────────────────────

/// A candidate or played move in coordinate form.
///
/// Serialized flat (`{"from","to","promotion"?}`). Decoding also accepts the
/// same object nested under a `move` key, as older server builds send it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "MoveWire")]
pub struct Move {
    pub from: Square,
    pub to: Square,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PieceKind>,
}

impl Move {
    /// A move without a promotion piece.
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    /// Attach a promotion piece.
    #[must_use]
    pub fn with_promotion(mut self, piece: PieceKind) -> Self {
        self.promotion = Some(piece);
        self
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(piece) = self.promotion {
            write!(f, "{}", piece.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for Move {
    type Err = InvalidMoveText;

    /// Parse coordinate notation such as `e2e4` or `e7e8q`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMoveText(s.to_string());
        let from = s.get(0..2).ok_or_else(invalid)?;
        let to = s.get(2..4).ok_or_else(invalid)?;
        let rest = s.get(4..).ok_or_else(invalid)?;

        let mut mv = Move::new(
            from.parse().map_err(|_| invalid())?,
            to.parse().map_err(|_| invalid())?,
        );
        let mut chars = rest.chars();
        match (chars.next(), chars.next()) {
            (None, _) => {}
            (Some(c), None) => {
                mv.promotion = Some(PieceKind::from_char(c).ok_or_else(invalid)?);
            }
            _ => return Err(invalid()),
        }
        Ok(mv)
    }
}

#[derive(Deserialize)]
struct CoordinateMove {
    from: Square,
    to: Square,
    #[serde(default)]
    promotion: Option<PieceKind>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MoveWire {
    Flat(CoordinateMove),
    Nested {
        #[serde(rename = "move")]
        inner: CoordinateMove,
    },
}

impl From<MoveWire> for Move {
    fn from(wire: MoveWire) -> Self {
        let (MoveWire::Flat(mv) | MoveWire::Nested { inner: mv }) = wire;
        Move {
            from: mv.from,
            to: mv.to,
            promotion: mv.promotion,
        }
    }
}

/// The last move shown on a game-list thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMove {
    pub from: Square,
    pub to: Square,
}

// ── Payload structs ─────────────────────────────────────────────────

/// Payload for the server's `INIT_GAME` acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitGamePayload {
    /// Color assigned to this client.
    pub color: Color,
    #[serde(default = "default_clock_ms")]
    pub white_time_ms: u64,
    #[serde(default = "default_clock_ms")]
    pub black_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

/// Payload for an authoritative `GAME_UPDATE` snapshot.
///
/// Clocks are serialized as `whiteTimeMs`/`blackTimeMs`. Decoding falls back
/// to `whiteTime`/`blackTime` in whole seconds when the millisecond field is
/// absent; a snapshot with neither spelling for a side is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "GameUpdateWire")]
pub struct GameUpdatePayload {
    /// Full position in Forsyth–Edwards Notation.
    pub fen: String,
    pub white_time_ms: u64,
    pub black_time_ms: u64,
    /// Side to move according to the server. Wins over the FEN on disagreement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<Color>,
    pub is_check: bool,
    pub is_checkmate: bool,
    pub is_draw: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

/// A snapshot that carries no clock for one side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("snapshot has no clock for {0}")]
pub struct MissingClock(pub Color);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameUpdateWire {
    fen: String,
    white_time_ms: Option<u64>,
    black_time_ms: Option<u64>,
    /// Seconds.
    white_time: Option<u64>,
    /// Seconds.
    black_time: Option<u64>,
    #[serde(default)]
    turn: Option<Color>,
    #[serde(default)]
    is_check: bool,
    #[serde(default)]
    is_checkmate: bool,
    #[serde(default)]
    is_draw: bool,
    #[serde(default)]
    game_id: Option<String>,
}

fn clock_ms(ms: Option<u64>, secs: Option<u64>, side: Color) -> Result<u64, MissingClock> {
    ms.or_else(|| secs.map(|s| s.saturating_mul(1000)))
        .ok_or(MissingClock(side))
}

impl TryFrom<GameUpdateWire> for GameUpdatePayload {
    type Error = MissingClock;

    fn try_from(wire: GameUpdateWire) -> Result<Self, Self::Error> {
        Ok(Self {
            white_time_ms: clock_ms(wire.white_time_ms, wire.white_time, Color::White)?,
            black_time_ms: clock_ms(wire.black_time_ms, wire.black_time, Color::Black)?,
            fen: wire.fen,
            turn: wire.turn,
            is_check: wire.is_check,
            is_checkmate: wire.is_checkmate,
            is_draw: wire.is_draw,
            game_id: wire.game_id,
        })
    }
}

/// Payload for a `GAME_OVER` notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameOverPayload {
    pub winner: Winner,
    pub reason: String,
}

/// One entry of the active-games list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    pub id: String,
    pub fen: String,
    pub turn: Color,
    /// Free-form status text (`"In Progress"`, `"Check"`, ...).
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_move: Option<LastMove>,
}

/// Payload for a `GAMES_LIST` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GamesListPayload {
    #[serde(default)]
    pub games: Vec<GameSummary>,
}

/// Payload for a server `ERROR` notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Payload naming a game to join or leave as a spectator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectatePayload {
    pub game_id: String,
}

/// Payload for a `RESYNC` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Ask the server to pair this client into a new game.
    InitGame {},
    /// Submit a move for the local side.
    Move(Move),
    /// Start watching a game.
    #[serde(alias = "join_spectate")]
    JoinSpectate(SpectatePayload),
    /// Stop watching a game.
    LeaveSpectate(SpectatePayload),
    /// Ask for the list of active games.
    #[serde(alias = "fetch_games", alias = "GET_ACTIVE_GAMES")]
    FetchGames {},
    /// Ask for a full authoritative snapshot after a reconnection.
    Resync(ResyncPayload),
}

/// Message types sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Session-init acknowledgment: the game has started.
    InitGame(InitGamePayload),
    /// Incremental move broadcast.
    #[serde(alias = "move")]
    Move(Move),
    /// Authoritative full-state snapshot.
    #[serde(alias = "game_update", alias = "GAME_STATE", alias = "game_state")]
    GameUpdate(GameUpdatePayload),
    /// The game has ended.
    GameOver(GameOverPayload),
    /// Active-games list.
    #[serde(
        alias = "games_list",
        alias = "game_states_update",
        alias = "ACTIVE_GAMES"
    )]
    GamesList(GamesListPayload),
    /// Generic error notice.
    #[serde(alias = "error")]
    Error(ErrorPayload),
}

impl ServerMessage {
    /// Every `type` tag [`ServerMessage`] accepts, including aliases.
    pub const TYPE_TAGS: &'static [&'static str] = &[
        "INIT_GAME",
        "MOVE",
        "move",
        "GAME_UPDATE",
        "game_update",
        "GAME_STATE",
        "game_state",
        "GAME_OVER",
        "GAMES_LIST",
        "games_list",
        "game_states_update",
        "ACTIVE_GAMES",
        "ERROR",
        "error",
    ];

    /// Canonical `type` tag of this message.
    pub fn type_tag(&self) -> &'static str {
        match self {
            ServerMessage::InitGame(_) => "INIT_GAME",
            ServerMessage::Move(_) => "MOVE",
            ServerMessage::GameUpdate(_) => "GAME_UPDATE",
            ServerMessage::GameOver(_) => "GAME_OVER",
            ServerMessage::GamesList(_) => "GAMES_LIST",
            ServerMessage::Error(_) => "ERROR",
        }
    }
}

impl ClientMessage {
    /// Canonical `type` tag of this message.
    pub fn type_tag(&self) -> &'static str {
        match self {
            ClientMessage::InitGame {} => "INIT_GAME",
            ClientMessage::Move(_) => "MOVE",
            ClientMessage::JoinSpectate(_) => "JOIN_SPECTATE",
            ClientMessage::LeaveSpectate(_) => "LEAVE_SPECTATE",
            ClientMessage::FetchGames {} => "FETCH_GAMES",
            ClientMessage::Resync(_) => "RESYNC",
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
    use super::*;

    #[test]
    fn square_parses_corners() {
        let a1: Square = "a1".parse().unwrap();
        let h8: Square = "h8".parse().unwrap();
        assert_eq!(a1.index(), 0);
        assert_eq!(h8.index(), 63);
        assert_eq!(h8.file(), 7);
        assert_eq!(h8.rank(), 7);
        assert_eq!(a1.to_string(), "a1");
    }

    #[test]
    fn square_rejects_out_of_range() {
        for bad in ["i1", "a9", "a0", "", "e", "e44", "E4"] {
            assert!(bad.parse::<Square>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn move_parses_coordinate_notation() {
        let mv: Move = "e7e8q".parse().unwrap();
        assert_eq!(mv.from.to_string(), "e7");
        assert_eq!(mv.to.to_string(), "e8");
        assert_eq!(mv.promotion, Some(PieceKind::Queen));
        assert_eq!(mv.to_string(), "e7e8q");

        assert!("e2e4".parse::<Move>().unwrap().promotion.is_none());
        assert!("e2".parse::<Move>().is_err());
        assert!("e7e8x".parse::<Move>().is_err());
        assert!("e7e8qq".parse::<Move>().is_err());
    }

    #[test]
    fn move_serializes_without_null_promotion() {
        let mv: Move = "e2e4".parse().unwrap();
        let json = serde_json::to_value(mv).unwrap();
        assert_eq!(json, serde_json::json!({ "from": "e2", "to": "e4" }));
    }

    #[test]
    fn color_accepts_short_forms() {
        let c: Color = serde_json::from_str("\"w\"").unwrap();
        assert_eq!(c, Color::White);
        let c: Color = serde_json::from_str("\"Black\"").unwrap();
        assert_eq!(c, Color::Black);
        assert_eq!(serde_json::to_string(&Color::White).unwrap(), "\"white\"");
    }

    #[test]
    fn init_game_clocks_default_to_ten_minutes() {
        let payload: InitGamePayload = serde_json::from_str(r#"{"color":"black"}"#).unwrap();
        assert_eq!(payload.color, Color::Black);
        assert_eq!(payload.white_time_ms, DEFAULT_CLOCK_MS);
        assert_eq!(payload.black_time_ms, DEFAULT_CLOCK_MS);
    }

    #[test]
    fn client_init_game_has_empty_payload_object() {
        let json = serde_json::to_value(ClientMessage::InitGame {}).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "INIT_GAME", "payload": {} }));
    }

    #[test]
    fn spectator_orientation_is_white() {
        assert_eq!(PlayerRole::Spectator.board_orientation(), Color::White);
        assert_eq!(PlayerRole::Black.board_orientation(), Color::Black);
    }
}
