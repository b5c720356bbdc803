//! # Watch Game Example
//!
//! Joins a live game as a spectator over WebSocket and prints every move,
//! the clocks, and the result.
//!
//! ## Running
//!
//! ```sh
//! # Start a chess server on localhost:8080, then:
//! cargo run --example watch_game -- <game-id>
//!
//! # Without a game id, lists the active games instead:
//! cargo run --example watch_game
//!
//! # Override the server URL:
//! CHESS_SYNC_URL=wss://chess.example.com/ws cargo run --example watch_game -- abc123
//! ```

use std::time::Duration;

use chess_sync_client::client::DEFAULT_ENDPOINT;
use chess_sync_client::{
    format_clock, BackoffPolicy, ChessClient, ChessEvent, ChessSyncConfig, SpectatorSession,
    WebSocketConnector,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("CHESS_SYNC_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
    let config = ChessSyncConfig::new(url.clone()).with_backoff(BackoffPolicy::default());
    let connector = WebSocketConnector::new().with_timeout(Duration::from_secs(5));
    tracing::info!("Connecting to {url}");

    let Some(game_id) = std::env::args().nth(1) else {
        return list_games(connector, config).await;
    };

    // ── Spectate ────────────────────────────────────────────────────
    let (mut session, mut events) = SpectatorSession::start(connector, config, game_id)?;
    let mut last_second = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ChessEvent::SnapshotApplied { fen, turn } => {
                        println!("Position: {fen} ({turn} to move)");
                    }
                    ChessEvent::ServerMoveApplied { applied } => {
                        println!("{:>5} {}", applied.color.to_string(), applied.san);
                    }
                    ChessEvent::Clock(reading) => {
                        // Print once per second, not on every tick.
                        let second = (reading.white_ms / 1000, reading.black_ms / 1000);
                        if last_second != Some(second) {
                            last_second = Some(second);
                            tracing::debug!(
                                "white {} black {}",
                                format_clock(reading.white_ms),
                                format_clock(reading.black_ms)
                            );
                        }
                    }
                    ChessEvent::GameOver { winner, reason } => {
                        println!("Game over: {winner:?} ({reason})");
                        session.shutdown().await;
                    }
                    ChessEvent::Disconnected { code, reason } => {
                        tracing::warn!(code, %reason, "disconnected");
                    }
                    ChessEvent::Unreachable => {
                        tracing::error!("server unreachable; giving up");
                        session.shutdown().await;
                    }
                    ChessEvent::Shutdown => break,
                    other => tracing::debug!(?other, "event"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving game");
                session.shutdown().await;
            }
        }
    }

    Ok(())
}

async fn list_games(
    connector: WebSocketConnector,
    config: ChessSyncConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut client, mut events) = ChessClient::start(connector, config);
    client.fetch_games()?;

    while let Some(event) = events.recv().await {
        match event {
            ChessEvent::GamesList { games } => {
                if games.is_empty() {
                    println!("No active games.");
                }
                for game in games {
                    println!("{:<24} {:<12} {} to move", game.id, game.status, game.turn);
                }
                client.shutdown().await;
            }
            ChessEvent::Unreachable => client.shutdown().await,
            ChessEvent::Shutdown => break,
            _ => {}
        }
    }
    Ok(())
}
