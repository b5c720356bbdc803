#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Wire-format tests for the chess sync protocol.
//!
//! Outbound envelopes are compared against the exact JSON the server
//! expects; inbound fixtures cover every accepted `type` tag, the legacy
//! aliases, and the optional fields older server builds leave out.

use chess_sync_client::codec::{decode, encode};
use chess_sync_client::protocol::{
    ClientMessage, Color, GameUpdatePayload, LastMove, Move, PieceKind, ResyncPayload,
    ServerMessage, SpectatePayload, Winner, DEFAULT_CLOCK_MS,
};
use chess_sync_client::DecodeError;
use serde_json::{json, Value};

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

fn encoded(msg: &ClientMessage) -> Value {
    serde_json::from_str(&encode(msg).expect("encode")).expect("valid JSON")
}

fn mv(s: &str) -> Move {
    s.parse().unwrap()
}

// ════════════════════════════════════════════════════════════════════
// Outbound envelopes
// ════════════════════════════════════════════════════════════════════

#[test]
fn init_game_request_wire_format() {
    assert_eq!(
        encoded(&ClientMessage::InitGame {}),
        json!({ "type": "INIT_GAME", "payload": {} })
    );
}

#[test]
fn move_submit_wire_format() {
    assert_eq!(
        encoded(&ClientMessage::Move(mv("g1f3"))),
        json!({ "type": "MOVE", "payload": { "from": "g1", "to": "f3" } })
    );
}

#[test]
fn promoting_move_carries_lowercase_piece() {
    let msg = ClientMessage::Move(mv("b7b8").with_promotion(PieceKind::Knight));
    assert_eq!(
        encoded(&msg),
        json!({ "type": "MOVE", "payload": { "from": "b7", "to": "b8", "promotion": "n" } })
    );
}

#[test]
fn spectate_requests_wire_format() {
    let payload = SpectatePayload {
        game_id: "g-42".into(),
    };
    assert_eq!(
        encoded(&ClientMessage::JoinSpectate(payload.clone())),
        json!({ "type": "JOIN_SPECTATE", "payload": { "gameId": "g-42" } })
    );
    assert_eq!(
        encoded(&ClientMessage::LeaveSpectate(payload)),
        json!({ "type": "LEAVE_SPECTATE", "payload": { "gameId": "g-42" } })
    );
}

#[test]
fn fetch_games_wire_format() {
    assert_eq!(
        encoded(&ClientMessage::FetchGames {}),
        json!({ "type": "FETCH_GAMES", "payload": {} })
    );
}

#[test]
fn resync_omits_unknown_game_id() {
    assert_eq!(
        encoded(&ClientMessage::Resync(ResyncPayload::default())),
        json!({ "type": "RESYNC", "payload": {} })
    );
    assert_eq!(
        encoded(&ClientMessage::Resync(ResyncPayload {
            game_id: Some("g-1".into())
        })),
        json!({ "type": "RESYNC", "payload": { "gameId": "g-1" } })
    );
}

#[test]
fn client_type_tags_match_wire() {
    let messages = [
        ClientMessage::InitGame {},
        ClientMessage::Move(mv("e2e4")),
        ClientMessage::JoinSpectate(SpectatePayload { game_id: "x".into() }),
        ClientMessage::LeaveSpectate(SpectatePayload { game_id: "x".into() }),
        ClientMessage::FetchGames {},
        ClientMessage::Resync(ResyncPayload::default()),
    ];
    for msg in &messages {
        assert_eq!(encoded(msg)["type"], msg.type_tag());
    }
}

// ════════════════════════════════════════════════════════════════════
// Inbound fixtures
// ════════════════════════════════════════════════════════════════════

/// A minimal valid payload for each canonical server message.
fn sample_payload(canonical: &str) -> Value {
    match canonical {
        "INIT_GAME" => json!({ "color": "white" }),
        "MOVE" => json!({ "from": "e7", "to": "e5" }),
        "GAME_UPDATE" => json!({
            "fen": "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "whiteTimeMs": 1,
            "blackTimeMs": 2
        }),
        "GAME_OVER" => json!({ "winner": "draw", "reason": "Stalemate" }),
        "GAMES_LIST" => json!({ "games": [] }),
        "ERROR" => json!({ "message": "nope" }),
        other => panic!("no sample for {other}"),
    }
}

#[test]
fn every_accepted_tag_decodes_to_its_canonical_variant() {
    let aliases = [
        ("INIT_GAME", "INIT_GAME"),
        ("MOVE", "MOVE"),
        ("move", "MOVE"),
        ("GAME_UPDATE", "GAME_UPDATE"),
        ("game_update", "GAME_UPDATE"),
        ("GAME_STATE", "GAME_UPDATE"),
        ("game_state", "GAME_UPDATE"),
        ("GAME_OVER", "GAME_OVER"),
        ("GAMES_LIST", "GAMES_LIST"),
        ("games_list", "GAMES_LIST"),
        ("game_states_update", "GAMES_LIST"),
        ("ACTIVE_GAMES", "GAMES_LIST"),
        ("ERROR", "ERROR"),
        ("error", "ERROR"),
    ];
    assert_eq!(aliases.len(), ServerMessage::TYPE_TAGS.len());

    for (tag, canonical) in aliases {
        assert!(ServerMessage::TYPE_TAGS.contains(&tag));
        let text = json!({ "type": tag, "payload": sample_payload(canonical) }).to_string();
        let msg = decode(&text).unwrap_or_else(|e| panic!("{tag}: {e}"));
        assert_eq!(msg.type_tag(), canonical, "tag {tag}");
    }
}

#[test]
fn init_game_fixture_from_server() {
    let msg = decode(
        r#"{"type":"INIT_GAME","payload":{"color":"black","whiteTimeMs":180000,"blackTimeMs":180000,"gameId":"abc"}}"#,
    )
    .unwrap();
    let ServerMessage::InitGame(payload) = msg else {
        panic!("expected InitGame");
    };
    assert_eq!(payload.color, Color::Black);
    assert_eq!(payload.white_time_ms, 180_000);
    assert_eq!(payload.game_id.as_deref(), Some("abc"));
}

#[test]
fn init_game_without_clocks_uses_default() {
    let ServerMessage::InitGame(payload) =
        decode(r#"{"type":"INIT_GAME","payload":{"color":"w"}}"#).unwrap()
    else {
        panic!("expected InitGame");
    };
    assert_eq!(payload.color, Color::White);
    assert_eq!(payload.white_time_ms, DEFAULT_CLOCK_MS);
    assert_eq!(payload.black_time_ms, DEFAULT_CLOCK_MS);
    assert!(payload.game_id.is_none());
}

#[test]
fn full_snapshot_fixture_from_server() {
    let msg = decode(
        r#"{
            "type": "GAME_UPDATE",
            "payload": {
                "fen": "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
                "whiteTimeMs": 590000,
                "blackTimeMs": 595000,
                "turn": "w",
                "isCheck": true,
                "isCheckmate": true,
                "isDraw": false,
                "gameId": "abc"
            }
        }"#,
    )
    .unwrap();
    assert_eq!(
        msg,
        ServerMessage::GameUpdate(GameUpdatePayload {
            fen: "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3".into(),
            white_time_ms: 590_000,
            black_time_ms: 595_000,
            turn: Some(Color::White),
            is_check: true,
            is_checkmate: true,
            is_draw: false,
            game_id: Some("abc".into()),
        })
    );
}

#[test]
fn snapshot_flags_default_to_false() {
    let ServerMessage::GameUpdate(payload) = decode(
        r#"{"type":"GAME_UPDATE","payload":{"fen":"8/8/8/8/8/8/8/K6k w - - 0 1","whiteTimeMs":0,"blackTimeMs":0}}"#,
    )
    .unwrap() else {
        panic!("expected GameUpdate");
    };
    assert!(!payload.is_check && !payload.is_checkmate && !payload.is_draw);
    assert!(payload.turn.is_none());
}

#[test]
fn snapshot_without_clocks_is_invalid() {
    let err = decode(r#"{"type":"GAME_UPDATE","payload":{"fen":"8/8/8/8/8/8/8/K6k w - - 0 1"}}"#)
        .unwrap_err();
    assert!(matches!(err, DecodeError::InvalidPayload { ref kind, .. } if kind == "GAME_UPDATE"));
}

#[test]
fn move_broadcast_with_promotion_aliases() {
    for piece in ["q", "Q", "queen"] {
        let text = json!({
            "type": "MOVE",
            "payload": { "from": "e7", "to": "e8", "promotion": piece }
        })
        .to_string();
        assert_eq!(
            decode(&text).unwrap(),
            ServerMessage::Move(mv("e7e8").with_promotion(PieceKind::Queen))
        );
    }
}

#[test]
fn move_nested_under_move_key_decodes() {
    let msg = decode(
        r#"{"type":"move","payload":{"move":{"from":"a7","to":"a8","promotion":"r"}}}"#,
    )
    .unwrap();
    assert_eq!(
        msg,
        ServerMessage::Move(mv("a7a8").with_promotion(PieceKind::Rook))
    );

    let msg = decode(r#"{"type":"MOVE","payload":{"move":{"from":"e7","to":"e5"}}}"#).unwrap();
    assert_eq!(msg, ServerMessage::Move(mv("e7e5")));
}

#[test]
fn nested_move_missing_squares_is_invalid() {
    let err = decode(r#"{"type":"MOVE","payload":{"move":{"from":"e7"}}}"#).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidPayload { ref kind, .. } if kind == "MOVE"));
}

#[test]
fn snapshot_clocks_in_seconds_are_converted() {
    let ServerMessage::GameUpdate(payload) = decode(
        r#"{"type":"game_state","payload":{"fen":"8/8/8/8/8/8/8/K6k w - - 0 1","whiteTime":590,"blackTime":42}}"#,
    )
    .unwrap() else {
        panic!("expected GameUpdate");
    };
    assert_eq!(payload.white_time_ms, 590_000);
    assert_eq!(payload.black_time_ms, 42_000);
}

#[test]
fn millisecond_clock_wins_over_seconds() {
    let ServerMessage::GameUpdate(payload) = decode(
        r#"{"type":"GAME_UPDATE","payload":{"fen":"8/8/8/8/8/8/8/K6k w - - 0 1","whiteTimeMs":1500,"whiteTime":9,"blackTime":3}}"#,
    )
    .unwrap() else {
        panic!("expected GameUpdate");
    };
    assert_eq!(payload.white_time_ms, 1_500);
    assert_eq!(payload.black_time_ms, 3_000);
}

#[test]
fn snapshot_serializes_millisecond_clocks() {
    let payload = GameUpdatePayload {
        fen: "8/8/8/8/8/8/8/K6k w - - 0 1".into(),
        white_time_ms: 1,
        black_time_ms: 2,
        turn: None,
        is_check: false,
        is_checkmate: false,
        is_draw: false,
        game_id: None,
    };
    let value = serde_json::to_value(ServerMessage::GameUpdate(payload.clone())).unwrap();
    assert_eq!(value["payload"]["whiteTimeMs"], 1);
    assert!(value["payload"].get("whiteTime").is_none());
    assert_eq!(
        serde_json::from_value::<ServerMessage>(value).unwrap(),
        ServerMessage::GameUpdate(payload)
    );
}

#[test]
fn game_over_winner_spellings() {
    let cases = [
        ("white", Winner::White),
        ("WHITE", Winner::White),
        ("b", Winner::Black),
        ("Black", Winner::Black),
        ("draw", Winner::Draw),
        ("none", Winner::Draw),
    ];
    for (text, expected) in cases {
        let envelope = json!({
            "type": "GAME_OVER",
            "payload": { "winner": text, "reason": "Checkmate" }
        })
        .to_string();
        let ServerMessage::GameOver(payload) = decode(&envelope).unwrap() else {
            panic!("expected GameOver");
        };
        assert_eq!(payload.winner, expected, "winner {text}");
    }
}

#[test]
fn games_list_fixture_with_last_move() {
    let ServerMessage::GamesList(list) = decode(
        r#"{
            "type": "ACTIVE_GAMES",
            "payload": {
                "games": [
                    {
                        "id": "g1",
                        "fen": "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
                        "turn": "b",
                        "status": "In Progress",
                        "lastMove": { "from": "e2", "to": "e4" }
                    },
                    {
                        "id": "g2",
                        "fen": "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
                        "turn": "white",
                        "status": "Waiting"
                    }
                ]
            }
        }"#,
    )
    .unwrap() else {
        panic!("expected GamesList");
    };
    assert_eq!(list.games.len(), 2);
    assert_eq!(list.games[0].turn, Color::Black);
    assert_eq!(
        list.games[0].last_move,
        Some(LastMove {
            from: "e2".parse().unwrap(),
            to: "e4".parse().unwrap(),
        })
    );
    assert!(list.games[1].last_move.is_none());
}

#[test]
fn unknown_payload_fields_are_ignored() {
    let msg = decode(
        r#"{"type":"ERROR","payload":{"message":"rate limited","code":429},"serverTime":1}"#,
    )
    .unwrap();
    assert_eq!(msg.type_tag(), "ERROR");
}

#[test]
fn client_only_tags_are_unknown_inbound() {
    for tag in ["JOIN_SPECTATE", "LEAVE_SPECTATE", "FETCH_GAMES", "RESYNC"] {
        let text = json!({ "type": tag, "payload": {} }).to_string();
        assert!(
            matches!(decode(&text), Err(DecodeError::UnknownType(ref t)) if t == tag),
            "{tag} should not decode as a server message"
        );
    }
}
