//! Move validation on top of the `chess` rules engine.
//!
//! [`Position`] is an opaque, `Copy` board value: every accepted move or
//! snapshot produces a new one, so a speculative position and a confirmed one
//! can never alias. [`MoveValidator`] is the only place that talks to the
//! engine. It answers legality, promotion ambiguity, legal destinations, and
//! produces [`AppliedMove`] metadata (SAN, flags, resulting position).

use std::fmt;
use std::str::FromStr;

use chess::{BoardStatus, ChessMove, MoveGen};
use thiserror::Error;

use crate::protocol::{Color, Move, PieceKind, Square};

/// A FEN string the rules engine could not load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid FEN {0:?}")]
pub struct InvalidFen(pub String);

/// A snapshot names a side to move that its FEN cannot have: the other side
/// is in check, so handing it the move would be illegal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{turn} cannot be to move in {fen:?}")]
pub struct InconsistentTurn {
    pub turn: Color,
    pub fen: String,
}

/// The rules engine rejected a candidate move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal move {0}")]
pub struct IllegalMove(pub Move);

/// Kind of chess piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Piece {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl Piece {
    /// Uppercase SAN letter; empty for pawns.
    fn san_letter(self) -> &'static str {
        match self {
            Piece::Pawn => "",
            Piece::Knight => "N",
            Piece::Bishop => "B",
            Piece::Rook => "R",
            Piece::Queen => "Q",
            Piece::King => "K",
        }
    }
}

/// Whether a position is still playable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Ongoing,
    Checkmate {
        /// The side that delivered mate.
        winner: Color,
    },
    Stalemate,
}

impl PositionStatus {
    /// `true` for checkmate and stalemate.
    pub fn is_terminal(self) -> bool {
        !matches!(self, PositionStatus::Ongoing)
    }
}

/// An immutable board configuration including side to move, castling rights
/// and en-passant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    board: chess::Board,
}

impl Position {
    /// The standard starting position.
    pub fn initial() -> Self {
        Self {
            board: chess::Board::default(),
        }
    }

    /// Load a position from Forsyth–Edwards Notation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidFen`] if the engine rejects the text or the position.
    pub fn from_fen(fen: &str) -> Result<Self, InvalidFen> {
        chess::Board::from_str(fen.trim())
            .map(|board| Self { board })
            .map_err(|_| InvalidFen(fen.to_string()))
    }

    /// The position as FEN.
    pub fn fen(&self) -> String {
        self.board.to_string()
    }

    /// Side to move.
    pub fn turn(&self) -> Color {
        color_from_engine(self.board.side_to_move())
    }

    /// The same placement with `turn` to move. En-passant rights are lost
    /// when the side changes.
    ///
    /// # Errors
    ///
    /// Returns [`InconsistentTurn`] if the current side to move is in check.
    pub fn with_side_to_move(self, turn: Color) -> Result<Self, InconsistentTurn> {
        if self.turn() == turn {
            return Ok(self);
        }
        self.board
            .null_move()
            .map(|board| Self { board })
            .ok_or_else(|| InconsistentTurn {
                turn,
                fen: self.fen(),
            })
    }

    /// `true` when the side to move is in check.
    pub fn is_check(&self) -> bool {
        *self.board.checkers() != chess::EMPTY
    }

    /// Checkmate / stalemate / ongoing.
    pub fn status(&self) -> PositionStatus {
        match self.board.status() {
            BoardStatus::Ongoing => PositionStatus::Ongoing,
            BoardStatus::Stalemate => PositionStatus::Stalemate,
            BoardStatus::Checkmate => PositionStatus::Checkmate {
                winner: self.turn().opposite(),
            },
        }
    }

    /// The piece standing on `square`, if any.
    pub fn piece_at(&self, square: Square) -> Option<(Color, Piece)> {
        let sq = square_to_engine(square);
        let piece = self.board.piece_on(sq)?;
        let color = self.board.color_on(sq)?;
        Some((color_from_engine(color), piece_from_engine(piece)))
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fen())
    }
}

/// Flags describing what a move did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MoveFlags {
    pub capture: bool,
    pub en_passant: bool,
    pub kingside_castle: bool,
    pub queenside_castle: bool,
    pub promotion: bool,
    pub check: bool,
    pub checkmate: bool,
}

/// A legal move together with everything the engine reports about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    /// The move as played. `promotion` is only set on promoting moves.
    pub mv: Move,
    /// Standard algebraic notation, e.g. `Nbd2`, `exd6`, `O-O`, `a8=Q+`.
    pub san: String,
    pub piece: Piece,
    pub color: Color,
    pub captured: Option<Piece>,
    pub flags: MoveFlags,
    /// Position after the move.
    pub position: Position,
}

/// Thin wrapper over the rules engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveValidator;

impl MoveValidator {
    pub fn new() -> Self {
        Self
    }

    /// `true` when `from → to` is a legal pawn move onto the back rank, so a
    /// promotion piece must be chosen before the move can be applied.
    pub fn needs_promotion(&self, position: &Position, from: Square, to: Square) -> bool {
        let (src, dest) = (square_to_engine(from), square_to_engine(to));
        MoveGen::new_legal(&position.board).any(|m| {
            m.get_source() == src && m.get_dest() == dest && m.get_promotion().is_some()
        })
    }

    /// Check `mv` against `position` and, if legal, play it.
    ///
    /// A promotion piece on a move that does not promote is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalMove`] if the engine rejects the move, including a
    /// promoting move with no piece chosen.
    pub fn validate(&self, position: &Position, mv: Move) -> Result<AppliedMove, IllegalMove> {
        let board = &position.board;
        let promotes = self.needs_promotion(position, mv.from, mv.to);
        let mv = if promotes {
            mv
        } else {
            Move::new(mv.from, mv.to)
        };

        let engine_move = ChessMove::new(
            square_to_engine(mv.from),
            square_to_engine(mv.to),
            mv.promotion.map(promotion_to_engine),
        );
        if !board.legal(engine_move) {
            return Err(IllegalMove(mv));
        }

        let piece = board
            .piece_on(engine_move.get_source())
            .map(piece_from_engine)
            .ok_or(IllegalMove(mv))?;
        let color = position.turn();
        let after = Position {
            board: board.make_move_new(engine_move),
        };

        let file_delta = i16::from(mv.to.file()) - i16::from(mv.from.file());
        let mut flags = MoveFlags::default();
        let mut captured = board
            .piece_on(engine_move.get_dest())
            .map(piece_from_engine);
        if piece == Piece::Pawn && file_delta != 0 && captured.is_none() {
            flags.en_passant = true;
            captured = Some(Piece::Pawn);
        }
        flags.capture = captured.is_some();
        flags.kingside_castle = piece == Piece::King && file_delta == 2;
        flags.queenside_castle = piece == Piece::King && file_delta == -2;
        flags.promotion = mv.promotion.is_some();
        flags.checkmate = matches!(after.status(), PositionStatus::Checkmate { .. });
        flags.check = after.is_check();

        let san = self.san(position, mv, piece, &flags);
        Ok(AppliedMove {
            mv,
            san,
            piece,
            color,
            captured,
            flags,
            position: after,
        })
    }

    /// Squares the piece on `from` can legally move to.
    pub fn legal_destinations(&self, position: &Position, from: Square) -> Vec<Square> {
        let src = square_to_engine(from);
        let mut squares: Vec<Square> = MoveGen::new_legal(&position.board)
            .filter(|m| m.get_source() == src)
            .map(|m| square_from_engine(m.get_dest()))
            .collect();
        squares.sort();
        squares.dedup();
        squares
    }

    /// Every legal move in `position`, promotions expanded per piece.
    pub fn legal_moves(&self, position: &Position) -> Vec<Move> {
        MoveGen::new_legal(&position.board)
            .map(|m| Move {
                from: square_from_engine(m.get_source()),
                to: square_from_engine(m.get_dest()),
                promotion: m.get_promotion().and_then(promotion_from_engine),
            })
            .collect()
    }

    fn san(&self, before: &Position, mv: Move, piece: Piece, flags: &MoveFlags) -> String {
        let mut san = if flags.kingside_castle {
            "O-O".to_string()
        } else if flags.queenside_castle {
            "O-O-O".to_string()
        } else {
            let mut out = String::from(piece.san_letter());
            if piece == Piece::Pawn {
                if flags.capture {
                    out.push(file_char(mv.from));
                }
            } else {
                out.push_str(&self.disambiguation(before, mv, piece));
            }
            if flags.capture {
                out.push('x');
            }
            out.push_str(&mv.to.to_string());
            if let Some(promotion) = mv.promotion {
                out.push('=');
                out.push(promotion.as_char().to_ascii_uppercase());
            }
            out
        };

        if flags.checkmate {
            san.push('#');
        } else if flags.check {
            san.push('+');
        }
        san
    }

    /// File and/or rank needed to tell `mv` apart from same-piece moves to the
    /// same square.
    fn disambiguation(&self, before: &Position, mv: Move, piece: Piece) -> String {
        let dest = square_to_engine(mv.to);
        let rivals: Vec<Square> = MoveGen::new_legal(&before.board)
            .filter(|m| m.get_dest() == dest)
            .map(|m| m.get_source())
            .filter(|src| {
                before.board.piece_on(*src).map(piece_from_engine) == Some(piece)
            })
            .map(square_from_engine)
            .filter(|src| *src != mv.from)
            .collect();

        if rivals.is_empty() {
            String::new()
        } else if rivals.iter().all(|r| r.file() != mv.from.file()) {
            file_char(mv.from).to_string()
        } else if rivals.iter().all(|r| r.rank() != mv.from.rank()) {
            rank_char(mv.from).to_string()
        } else {
            mv.from.to_string()
        }
    }
}

fn file_char(square: Square) -> char {
    char::from(b'a' + square.file())
}

fn rank_char(square: Square) -> char {
    char::from(b'1' + square.rank())
}

// ── Engine conversions ──────────────────────────────────────────────

fn square_to_engine(square: Square) -> chess::Square {
    chess::Square::make_square(
        chess::Rank::from_index(usize::from(square.rank())),
        chess::File::from_index(usize::from(square.file())),
    )
}

fn square_from_engine(square: chess::Square) -> Square {
    Square::from_wrapped_index(square.to_index())
}

fn color_from_engine(color: chess::Color) -> Color {
    match color {
        chess::Color::White => Color::White,
        chess::Color::Black => Color::Black,
    }
}

fn piece_from_engine(piece: chess::Piece) -> Piece {
    match piece {
        chess::Piece::Pawn => Piece::Pawn,
        chess::Piece::Knight => Piece::Knight,
        chess::Piece::Bishop => Piece::Bishop,
        chess::Piece::Rook => Piece::Rook,
        chess::Piece::Queen => Piece::Queen,
        chess::Piece::King => Piece::King,
    }
}

fn promotion_to_engine(piece: PieceKind) -> chess::Piece {
    match piece {
        PieceKind::Queen => chess::Piece::Queen,
        PieceKind::Rook => chess::Piece::Rook,
        PieceKind::Bishop => chess::Piece::Bishop,
        PieceKind::Knight => chess::Piece::Knight,
    }
}

fn promotion_from_engine(piece: chess::Piece) -> Option<PieceKind> {
    match piece {
        chess::Piece::Queen => Some(PieceKind::Queen),
        chess::Piece::Rook => Some(PieceKind::Rook),
        chess::Piece::Bishop => Some(PieceKind::Bishop),
        chess::Piece::Knight => Some(PieceKind::Knight),
        chess::Piece::Pawn | chess::Piece::King => None,
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

    fn play(moves: &[&str]) -> (Position, Vec<AppliedMove>) {
        let validator = MoveValidator::new();
        let mut position = Position::initial();
        let mut applied = Vec::new();
        for m in moves {
            let a = validator.validate(&position, mv(m)).unwrap();
            position = a.position;
            applied.push(a);
        }
        (position, applied)
    }

    #[test]
    fn opening_pawn_push_flips_turn() {
        let validator = MoveValidator::new();
        let start = Position::initial();
        let applied = validator.validate(&start, mv("e2e4")).unwrap();
        assert_eq!(applied.san, "e4");
        assert_eq!(applied.piece, Piece::Pawn);
        assert_eq!(applied.color, Color::White);
        assert_eq!(applied.position.turn(), Color::Black);
        // The original value is untouched.
        assert_eq!(start, Position::initial());
    }

    #[test]
    fn illegal_move_is_rejected() {
        let validator = MoveValidator::new();
        let err = validator
            .validate(&Position::initial(), mv("e2e5"))
            .unwrap_err();
        assert_eq!(err, IllegalMove(mv("e2e5")));
        assert!(validator
            .validate(&Position::initial(), mv("e7e5"))
            .is_err());
    }

    #[test]
    fn scholars_mate_is_checkmate() {
        let (position, applied) = play(&["e2e4", "e7e5", "d1h5", "b8c6", "f1c4", "g8f6", "h5f7"]);
        let last = applied.last().unwrap();
        assert_eq!(last.san, "Qxf7#");
        assert!(last.flags.capture && last.flags.checkmate);
        assert_eq!(last.captured, Some(Piece::Pawn));
        assert_eq!(
            position.status(),
            PositionStatus::Checkmate {
                winner: Color::White
            }
        );
    }

    #[test]
    fn promotion_detection_and_san() {
        let validator = MoveValidator::new();
        let position = Position::from_fen("7k/P7/8/8/8/8/8/K7 w - - 0 1").unwrap();
        assert!(validator.needs_promotion(&position, sq("a7"), sq("a8")));
        assert!(!validator.needs_promotion(&position, sq("a1"), sq("a2")));

        assert!(validator.validate(&position, mv("a7a8")).is_err());
        let queen = validator.validate(&position, mv("a7a8q")).unwrap();
        assert_eq!(queen.san, "a8=Q+");
        assert!(queen.flags.promotion && queen.flags.check);
        let knight = validator.validate(&position, mv("a7a8n")).unwrap();
        assert_eq!(knight.san, "a8=N");
    }

    #[test]
    fn promotion_piece_on_ordinary_move_is_ignored() {
        let validator = MoveValidator::new();
        let applied = validator
            .validate(&Position::initial(), mv("e2e4q"))
            .unwrap();
        assert_eq!(applied.mv, mv("e2e4"));
        assert!(!applied.flags.promotion);
    }

    #[test]
    fn castling_san() {
        let validator = MoveValidator::new();
        let position = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let short = validator.validate(&position, mv("e1g1")).unwrap();
        assert_eq!(short.san, "O-O");
        assert!(short.flags.kingside_castle);
        let long = validator.validate(&position, mv("e1c1")).unwrap();
        assert_eq!(long.san, "O-O-O");
        assert!(long.flags.queenside_castle);
    }

    #[test]
    fn en_passant_capture() {
        let validator = MoveValidator::new();
        let position = Position::from_fen("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 1").unwrap();
        let applied = validator.validate(&position, mv("e5d6")).unwrap();
        assert_eq!(applied.san, "exd6");
        assert!(applied.flags.en_passant && applied.flags.capture);
        assert_eq!(applied.captured, Some(Piece::Pawn));
        assert!(applied.position.piece_at(sq("d5")).is_none());
    }

    #[test]
    fn knight_moves_are_disambiguated_by_file() {
        let validator = MoveValidator::new();
        let position = Position::from_fen("4k3/8/8/8/8/8/8/1N2KN2 w - - 0 1").unwrap();
        let applied = validator.validate(&position, mv("b1d2")).unwrap();
        assert_eq!(applied.san, "Nbd2");
    }

    #[test]
    fn legal_destinations_of_starting_knight() {
        let validator = MoveValidator::new();
        let dests = validator.legal_destinations(&Position::initial(), sq("g1"));
        assert_eq!(dests, vec![sq("f3"), sq("h3")]);
        assert!(validator
            .legal_destinations(&Position::initial(), sq("e4"))
            .is_empty());
    }

    #[test]
    fn twenty_legal_moves_at_start() {
        assert_eq!(MoveValidator::new().legal_moves(&Position::initial()).len(), 20);
    }

    #[test]
    fn fen_round_trip_preserves_position() {
        let (position, _) = play(&["e2e4", "c7c5", "g1f3"]);
        let reloaded = Position::from_fen(&position.fen()).unwrap();
        assert_eq!(reloaded.fen(), position.fen());
        assert_eq!(reloaded.turn(), Color::Black);
    }

    #[test]
    fn side_to_move_can_be_handed_over() {
        let flipped = Position::initial().with_side_to_move(Color::Black).unwrap();
        assert_eq!(flipped.turn(), Color::Black);
        assert!(flipped.fen().contains(" b "));
        assert_eq!(MoveValidator::new().legal_moves(&flipped).len(), 20);
        assert_eq!(
            Position::initial().with_side_to_move(Color::White),
            Ok(Position::initial())
        );
    }

    #[test]
    fn side_in_check_keeps_the_move() {
        let mated = Position::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
            .unwrap();
        let err = mated.with_side_to_move(Color::Black).unwrap_err();
        assert_eq!(err.turn, Color::Black);
    }

    #[test]
    fn garbage_fen_is_rejected() {
        assert!(Position::from_fen("not a fen").is_err());
    }

    #[test]
    fn stalemate_is_terminal() {
        let position = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(position.status(), PositionStatus::Stalemate);
        assert!(position.status().is_terminal());
    }
}
