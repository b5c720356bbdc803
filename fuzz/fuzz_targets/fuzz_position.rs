#![no_main]

use chess_sync_client::{Move, MoveValidator, Position};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // First line is a FEN, the rest are coordinate moves.
    let mut lines = text.lines();
    let Some(Ok(mut position)) = lines.next().map(Position::from_fen) else {
        return;
    };
    let validator = MoveValidator::new();
    for line in lines {
        let Ok(mv) = line.trim().parse::<Move>() else {
            continue;
        };
        let _ = validator.needs_promotion(&position, mv.from, mv.to);
        if let Ok(applied) = validator.validate(&position, mv) {
            assert!(!applied.san.is_empty());
            position = applied.position;
        }
    }
    let _ = position.status();
});
