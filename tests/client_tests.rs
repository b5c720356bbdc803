//! Integration-style tests for the chess sync client.
//!
//! Each test drives a real [`ChessClient`] event loop against the
//! channel-backed mock server from `tests/common`, pushing envelopes and
//! asserting on the events and outbound messages that come back.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use std::time::Duration;

use chess_sync_client::connection::close_code;
use chess_sync_client::{
    BackoffPolicy, ChessClient, ChessEvent, ChessSyncConfig, ChessSyncError, Color,
    ConnectionState, LifecycleState, Move, MoveRejection, PieceKind, Square, SpectatorSession,
    Winner,
};
use serde_json::json;
use tokio::sync::mpsc;

use common::{
    collect_until, error_json, game_over_json, game_update_json, games_list_json, init_game_json,
    mock_connector, move_json, next_event, wait_for, Harness, MockServer, Plan, START_FEN,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn mv(s: &str) -> Move {
    s.parse().unwrap()
}

fn sq(s: &str) -> Square {
    s.parse().unwrap()
}

fn config() -> ChessSyncConfig {
    ChessSyncConfig::new("ws://chess.test")
        .with_backoff(BackoffPolicy::fixed(Duration::from_secs(1), 2))
}

/// Start a client, wait for its first connection, and have the server pair
/// it into a game as `color`.
async fn start_game(
    plan: Vec<Plan>,
    color: &str,
) -> (ChessClient, mpsc::Receiver<ChessEvent>, Harness, MockServer) {
    let (connector, mut harness) = mock_connector(plan);
    let (client, mut events) = ChessClient::start(connector, config());
    let mut server = harness.next_server().await;
    assert_eq!(next_event(&mut events).await, ChessEvent::Connected);

    client.new_game().unwrap();
    server.expect_sent("INIT_GAME").await;
    server.push(init_game_json(color));
    wait_for(&mut events, |e| matches!(e, ChessEvent::GameStarted { .. })).await;
    (client, events, harness, server)
}

// ════════════════════════════════════════════════════════════════════
// Connection and pairing
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn connects_and_publishes_open_state() {
    let (connector, mut harness) = mock_connector(vec![Plan::Accept]);
    let (client, mut events) = ChessClient::start(connector, config());
    let _server = harness.next_server().await;

    assert_eq!(next_event(&mut events).await, ChessEvent::Connected);
    assert!(client.is_connected());
    assert_eq!(client.view().lifecycle, LifecycleState::Idle);
}

#[tokio::test]
async fn new_game_waits_then_starts_on_ack() {
    let (connector, mut harness) = mock_connector(vec![Plan::Accept]);
    let (client, mut events) = ChessClient::start(connector, config());
    let mut server = harness.next_server().await;
    next_event(&mut events).await;

    client.new_game().unwrap();
    let sent = server.expect_sent("INIT_GAME").await;
    assert_eq!(sent, json!({ "type": "INIT_GAME", "payload": {} }));

    let changed = next_event(&mut events).await;
    assert_eq!(
        changed,
        ChessEvent::LifecycleChanged {
            from: LifecycleState::Idle,
            to: LifecycleState::WaitingForOpponent,
        }
    );

    server.push(init_game_json("black"));
    let started = wait_for(&mut events, |e| matches!(e, ChessEvent::GameStarted { .. })).await;
    assert_eq!(
        started,
        ChessEvent::GameStarted {
            color: Color::Black,
            game_id: Some("game-1".into()),
            white_ms: 600_000,
            black_ms: 600_000,
        }
    );

    let view = client.view();
    assert_eq!(view.lifecycle, LifecycleState::InProgress);
    assert_eq!(view.orientation(), Color::Black);
    assert_eq!(view.game_id.as_deref(), Some("game-1"));
}

#[tokio::test(start_paused = true)]
async fn intent_before_first_connection_is_sent_once_on_open() {
    let (connector, mut harness) = mock_connector(vec![Plan::Refuse, Plan::Accept]);
    let (client, mut events) = ChessClient::start(connector, config());
    client.new_game().unwrap();

    let seen = collect_until(&mut events, |e| *e == ChessEvent::Connected).await;
    assert!(seen.contains(&ChessEvent::ReconnectScheduled {
        attempt: 1,
        delay: Duration::from_secs(1),
    }));

    let mut server = harness.next_server().await;
    server.expect_sent("INIT_GAME").await;
    assert!(server.try_sent().is_none());
    assert_eq!(harness.attempts(), 2);
    assert_eq!(client.view().lifecycle, LifecycleState::WaitingForOpponent);
}

// ════════════════════════════════════════════════════════════════════
// Moves and reconciliation
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn echoed_local_move_converges_without_override() {
    let (client, mut events, _harness, mut server) = start_game(vec![Plan::Accept], "white").await;

    client.submit_move(mv("e2e4")).unwrap();
    let accepted = wait_for(&mut events, |e| matches!(e, ChessEvent::LocalMoveAccepted { .. })).await;
    let ChessEvent::LocalMoveAccepted { applied } = accepted else {
        unreachable!()
    };
    assert_eq!(applied.san, "e4");

    let sent = server.expect_sent("MOVE").await;
    assert_eq!(sent["payload"], json!({ "from": "e2", "to": "e4" }));

    let view = client.view();
    assert!(view.speculating);
    assert_ne!(view.fen, view.confirmed_fen);

    server.push(move_json("e2", "e4"));
    let seen = collect_until(&mut events, |e| matches!(e, ChessEvent::ServerMoveApplied { .. })).await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, ChessEvent::ReconciliationOverride { .. })));

    let view = client.view();
    assert!(!view.speculating);
    assert_eq!(view.fen, view.confirmed_fen);
    assert_eq!(view.turn, Color::Black);
    assert_eq!(view.moves, vec!["e4".to_string()]);
}

#[tokio::test]
async fn opponent_move_applies_directly() {
    let (client, mut events, _harness, server) = start_game(vec![Plan::Accept], "black").await;

    server.push(move_json("a2", "a4"));
    let applied = wait_for(&mut events, |e| matches!(e, ChessEvent::ServerMoveApplied { .. })).await;
    let ChessEvent::ServerMoveApplied { applied } = applied else {
        unreachable!()
    };
    assert_eq!(applied.mv, mv("a2a4"));

    let view = client.view();
    assert_eq!(view.turn, Color::Black);
    assert_eq!(view.moves, vec!["a4".to_string()]);
    assert!(client.legal_destinations(sq("e7")).contains(&sq("e5")));
}

#[tokio::test]
async fn differing_server_move_overrides_speculation() {
    let (client, mut events, _harness, mut server) = start_game(vec![Plan::Accept], "white").await;

    client.submit_move(mv("e2e4")).unwrap();
    server.expect_sent("MOVE").await;

    server.push(move_json("d2", "d4"));
    let event = wait_for(&mut events, |e| {
        matches!(e, ChessEvent::ReconciliationOverride { .. })
    })
    .await;
    let ChessEvent::ReconciliationOverride {
        speculated,
        authoritative,
    } = event
    else {
        unreachable!()
    };
    assert_eq!(speculated.mv, mv("e2e4"));
    assert_eq!(authoritative.mv, mv("d2d4"));

    let view = client.view();
    assert_eq!(view.fen, view.confirmed_fen);
    assert!(view
        .fen
        .starts_with("rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR b"));
}

#[tokio::test]
async fn move_out_of_turn_is_rejected_locally() {
    let (client, mut events, _harness, mut server) = start_game(vec![Plan::Accept], "black").await;

    client.submit_move(mv("e7e5")).unwrap();
    let event = wait_for(&mut events, |e| matches!(e, ChessEvent::LocalMoveRejected { .. })).await;
    assert_eq!(
        event,
        ChessEvent::LocalMoveRejected {
            mv: mv("e7e5"),
            reason: MoveRejection::NotYourTurn,
        }
    );
    assert!(server.try_sent().is_none());
    assert_eq!(client.view().fen, START_FEN);
}

#[tokio::test]
async fn illegal_local_move_is_not_sent() {
    let (client, mut events, _harness, mut server) = start_game(vec![Plan::Accept], "white").await;

    client.submit_move(mv("e2e5")).unwrap();
    let event = wait_for(&mut events, |e| matches!(e, ChessEvent::LocalMoveRejected { .. })).await;
    assert!(matches!(
        event,
        ChessEvent::LocalMoveRejected {
            reason: MoveRejection::IllegalMove,
            ..
        }
    ));
    assert!(server.try_sent().is_none());
}

#[tokio::test]
async fn promotion_asks_for_piece_then_sends_it() {
    let (client, mut events, _harness, mut server) = start_game(vec![Plan::Accept], "white").await;

    server.push(game_update_json("8/P6k/8/8/8/8/8/K7 w - - 0 1", 300_000, 300_000));
    wait_for(&mut events, |e| matches!(e, ChessEvent::SnapshotApplied { .. })).await;

    client.submit_move(mv("a7a8")).unwrap();
    let event = wait_for(&mut events, |e| matches!(e, ChessEvent::PromotionRequired { .. })).await;
    assert_eq!(
        event,
        ChessEvent::PromotionRequired {
            from: sq("a7"),
            to: sq("a8"),
        }
    );
    assert!(server.try_sent().is_none());

    client.resolve_promotion(PieceKind::Queen).unwrap();
    wait_for(&mut events, |e| matches!(e, ChessEvent::LocalMoveAccepted { .. })).await;
    let sent = server.expect_sent("MOVE").await;
    assert_eq!(
        sent["payload"],
        json!({ "from": "a7", "to": "a8", "promotion": "q" })
    );
    assert!(client.view().pending_promotion.is_none());
}

// ════════════════════════════════════════════════════════════════════
// Snapshots, game over, and diagnostics
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn checkmate_snapshot_ends_the_game() {
    let (client, mut events, _harness, server) = start_game(vec![Plan::Accept], "white").await;

    // Fool's mate, white to move and mated.
    server.push(game_update_json(
        "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
        590_000,
        595_000,
    ));

    let event = wait_for(&mut events, |e| matches!(e, ChessEvent::GameOver { .. })).await;
    assert_eq!(
        event,
        ChessEvent::GameOver {
            winner: Winner::Black,
            reason: "Checkmate".into(),
        }
    );
    assert!(matches!(
        client.view().lifecycle,
        LifecycleState::GameOver { .. }
    ));
}

#[tokio::test]
async fn game_over_notice_stops_move_submission() {
    let (client, mut events, _harness, server) = start_game(vec![Plan::Accept], "white").await;

    server.push(game_over_json("black", "Resignation"));
    let event = wait_for(&mut events, |e| matches!(e, ChessEvent::GameOver { .. })).await;
    assert_eq!(
        event,
        ChessEvent::GameOver {
            winner: Winner::Black,
            reason: "Resignation".into(),
        }
    );

    client.submit_move(mv("e2e4")).unwrap();
    let event = wait_for(&mut events, |e| matches!(e, ChessEvent::LocalMoveRejected { .. })).await;
    assert!(matches!(
        event,
        ChessEvent::LocalMoveRejected {
            reason: MoveRejection::NotInProgress,
            ..
        }
    ));
}

#[tokio::test]
async fn malformed_messages_are_discarded_and_the_loop_survives() {
    let (connector, mut harness) = mock_connector(vec![Plan::Accept]);
    let (client, mut events) = ChessClient::start(connector, config());
    let server = harness.next_server().await;
    next_event(&mut events).await;

    server.push_raw("{oops");
    assert!(matches!(
        next_event(&mut events).await,
        ChessEvent::MessageDiscarded { .. }
    ));

    server.push(json!({ "type": "TELEPORT", "payload": {} }));
    assert!(matches!(
        next_event(&mut events).await,
        ChessEvent::MessageDiscarded { .. }
    ));

    server.push(error_json("slow down"));
    assert_eq!(
        next_event(&mut events).await,
        ChessEvent::ServerError {
            message: "slow down".into()
        }
    );

    server.push(games_list_json(&["a", "b"]));
    let ChessEvent::GamesList { games } = next_event(&mut events).await else {
        panic!("expected GamesList");
    };
    assert_eq!(games.len(), 2);
    assert!(client.is_connected());
}

#[tokio::test]
async fn unexpected_move_while_idle_is_ignored() {
    let (connector, mut harness) = mock_connector(vec![Plan::Accept]);
    let (client, mut events) = ChessClient::start(connector, config());
    let server = harness.next_server().await;
    next_event(&mut events).await;

    server.push(move_json("e2", "e4"));
    server.push(error_json("marker"));
    assert_eq!(
        next_event(&mut events).await,
        ChessEvent::ServerError {
            message: "marker".into()
        }
    );
    assert_eq!(client.view().fen, START_FEN);
}

// ════════════════════════════════════════════════════════════════════
// Reconnection
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_and_resyncs() {
    let (client, mut events, mut harness, server) =
        start_game(vec![Plan::Accept, Plan::Accept], "white").await;

    server.close(close_code::ABNORMAL);
    let event = wait_for(&mut events, |e| matches!(e, ChessEvent::Disconnected { .. })).await;
    assert_eq!(
        event,
        ChessEvent::Disconnected {
            code: close_code::ABNORMAL,
            reason: "mock server closed".into(),
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChessEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_secs(1),
        }
    );

    // Nothing can be sent during the backoff.
    client.submit_move(mv("e2e4")).unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ChessEvent::LocalMoveRejected {
            mv: mv("e2e4"),
            reason: MoveRejection::NotConnected,
        }
    );

    wait_for(&mut events, |e| *e == ChessEvent::Reconnected).await;
    let mut server = harness.next_server().await;
    let resync = server.expect_sent("RESYNC").await;
    assert_eq!(resync["payload"], json!({ "gameId": "game-1" }));

    client.submit_move(mv("e2e4")).unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ChessEvent::LocalMoveRejected {
            mv: mv("e2e4"),
            reason: MoveRejection::AwaitingResync,
        }
    );

    server.push(game_update_json(START_FEN, 590_000, 600_000));
    wait_for(&mut events, |e| matches!(e, ChessEvent::SnapshotApplied { .. })).await;
    client.submit_move(mv("e2e4")).unwrap();
    wait_for(&mut events, |e| matches!(e, ChessEvent::LocalMoveAccepted { .. })).await;
    server.expect_sent("MOVE").await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_backoff_reports_unreachable_until_retry() {
    let (client, mut events, mut harness, server) = start_game(
        vec![Plan::Accept, Plan::Refuse, Plan::Refuse, Plan::Accept],
        "white",
    )
    .await;

    server.close(close_code::ABNORMAL);
    let seen = collect_until(&mut events, |e| *e == ChessEvent::Unreachable).await;
    let scheduled: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            ChessEvent::ReconnectScheduled { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(scheduled, vec![1, 2]);
    assert!(seen.contains(&ChessEvent::LifecycleChanged {
        from: LifecycleState::InProgress,
        to: LifecycleState::Unreachable,
    }));
    assert_eq!(harness.attempts(), 3);
    assert_eq!(client.connection_state(), ConnectionState::Closed);

    // No further attempts on our own.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.attempts(), 3);

    client.retry().unwrap();
    let seen = collect_until(&mut events, |e| *e == ChessEvent::Reconnected).await;
    assert!(seen.contains(&ChessEvent::LifecycleChanged {
        from: LifecycleState::Unreachable,
        to: LifecycleState::InProgress,
    }));
    let mut server = harness.next_server().await;
    server.expect_sent("RESYNC").await;
}

#[tokio::test]
async fn retry_while_connected_is_ignored() {
    let (client, _events, harness, mut server) =
        start_game(vec![Plan::Accept, Plan::Accept], "white").await;

    client.retry().unwrap();
    client.fetch_games().unwrap();
    tokio::time::timeout(Duration::from_secs(5), server.expect_sent("FETCH_GAMES"))
        .await
        .expect("request should reach the original connection");

    assert_eq!(harness.attempts(), 1);
    assert!(server.try_sent().is_none());
    assert!(client.is_connected());
    assert_eq!(client.view().lifecycle, LifecycleState::InProgress);
}

#[tokio::test(start_paused = true)]
async fn retry_during_backoff_waits_for_the_timer() {
    let (client, mut events, mut harness, server) =
        start_game(vec![Plan::Accept, Plan::Accept, Plan::Accept], "white").await;

    server.close(close_code::ABNORMAL);
    wait_for(&mut events, |e| matches!(e, ChessEvent::ReconnectScheduled { .. })).await;
    let scheduled_at = tokio::time::Instant::now();

    client.retry().unwrap();
    wait_for(&mut events, |e| *e == ChessEvent::Reconnected).await;
    assert!(scheduled_at.elapsed() >= Duration::from_millis(900));
    assert_eq!(harness.attempts(), 2);

    let mut server = harness.next_server().await;
    server.expect_sent("RESYNC").await;
    assert!(server.try_sent().is_none());
}

#[tokio::test(start_paused = true)]
async fn normal_close_does_not_reconnect() {
    let (connector, mut harness) = mock_connector(vec![Plan::Accept, Plan::Accept]);
    let (client, mut events) = ChessClient::start(connector, config());
    let server = harness.next_server().await;
    next_event(&mut events).await;

    server.close(close_code::NORMAL);
    assert_eq!(
        next_event(&mut events).await,
        ChessEvent::Disconnected {
            code: close_code::NORMAL,
            reason: String::new(),
        }
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.attempts(), 1);
    assert_eq!(client.connection_state(), ConnectionState::Closed);
}

// ════════════════════════════════════════════════════════════════════
// Spectating and the games list
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn spectator_session_follows_a_game_then_leaves() {
    let (connector, mut harness) = mock_connector(vec![Plan::Accept]);
    let (session, mut events) = SpectatorSession::start(connector, config(), "game-7").unwrap();
    let mut server = harness.next_server().await;

    let join = server.expect_sent("JOIN_SPECTATE").await;
    assert_eq!(join["payload"], json!({ "gameId": "game-7" }));
    assert!(!session.is_watching());

    server.push(game_update_json(START_FEN, 600_000, 600_000));
    wait_for(&mut events, |e| {
        matches!(
            e,
            ChessEvent::LifecycleChanged {
                to: LifecycleState::SpectatorWatching { .. },
                ..
            }
        )
    })
    .await;
    assert!(session.is_watching());

    server.push(move_json("e2", "e4"));
    wait_for(&mut events, |e| matches!(e, ChessEvent::ServerMoveApplied { .. })).await;
    assert_eq!(session.view().moves, vec!["e4".to_string()]);

    session.leave().unwrap();
    let leave = server.expect_sent("LEAVE_SPECTATE").await;
    assert_eq!(leave["payload"], json!({ "gameId": "game-7" }));
    wait_for(&mut events, |e| {
        *e == ChessEvent::LifecycleChanged {
            from: LifecycleState::SpectatorWatching {
                game_id: "game-7".into(),
            },
            to: LifecycleState::SpectatorSessionEnded {
                game_id: "game-7".into(),
            },
        }
    })
    .await;
    assert_eq!(session.game_id(), "game-7");
}

#[tokio::test]
async fn spectator_shutdown_leaves_before_closing() {
    let (connector, mut harness) = mock_connector(vec![Plan::Accept]);
    let (mut session, mut events) =
        SpectatorSession::start(connector, config(), "game-7").unwrap();
    let mut server = harness.next_server().await;
    server.expect_sent("JOIN_SPECTATE").await;

    session.shutdown().await;
    server.expect_sent("LEAVE_SPECTATE").await;
    assert!(server.client_closed());
    wait_for(&mut events, |e| *e == ChessEvent::Shutdown).await;
}

#[tokio::test(start_paused = true)]
async fn watching_games_refreshes_until_turned_off() {
    let (connector, mut harness) = mock_connector(vec![Plan::Accept]);
    let (client, mut events) = ChessClient::start(connector, config());
    let mut server = harness.next_server().await;
    next_event(&mut events).await;

    client.watch_games(true).unwrap();
    server.expect_sent("FETCH_GAMES").await;
    let started = tokio::time::Instant::now();
    server.expect_sent("FETCH_GAMES").await;
    assert!(started.elapsed() >= Duration::from_secs(5));

    client.watch_games(false).unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(server.try_sent().is_none());
}

// ════════════════════════════════════════════════════════════════════
// Shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shutdown_emits_final_event_and_closes_transport() {
    let (mut client, mut events, _harness, server) = start_game(vec![Plan::Accept], "white").await;

    client.shutdown().await;
    wait_for(&mut events, |e| *e == ChessEvent::Shutdown).await;
    assert!(events.recv().await.is_none());
    assert!(server.client_closed());
    assert_eq!(client.connection_state(), ConnectionState::Closed);
    assert!(matches!(client.new_game(), Err(ChessSyncError::ShutDown)));
}

#[tokio::test]
async fn reset_returns_to_idle() {
    let (client, mut events, _harness, _server) = start_game(vec![Plan::Accept], "white").await;

    client.reset().unwrap();
    wait_for(&mut events, |e| {
        *e == ChessEvent::LifecycleChanged {
            from: LifecycleState::InProgress,
            to: LifecycleState::Idle,
        }
    })
    .await;
    let view = client.view();
    assert_eq!(view.fen, START_FEN);
    assert!(view.moves.is_empty());
}
