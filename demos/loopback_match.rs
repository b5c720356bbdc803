//! # Loopback Match Example
//!
//! Plays a complete game against an in-process opponent, with no network.
//! The [`Connector`] here hands the client one half of a channel pair and
//! spawns a small server on the other half that echoes the client's moves,
//! answers with scripted replies, and announces the result.
//!
//! This is the pattern to copy for custom backends: implement [`Transport`]
//! for your I/O, wrap it in a [`Connector`], and pass that to
//! [`ChessClient::start`].
//!
//! ## Running
//!
//! ```sh
//! RUST_LOG=chess_sync_client=debug cargo run --example loopback_match
//! ```

use async_trait::async_trait;
use chess_sync_client::protocol::{ErrorPayload, GameOverPayload, InitGamePayload};
use chess_sync_client::rules::PositionStatus;
use chess_sync_client::{
    format_clock, ChessClient, ChessEvent, ChessSyncConfig, ChessSyncError, ClientMessage, Color,
    Connector, Move, MoveValidator, Position, ServerMessage, Transport, Winner,
};
use tokio::sync::mpsc;

/// White's moves, played by the client.
const WHITE_MOVES: &[&str] = &["e2e4", "f1c4", "d1h5", "h5f7"];
/// Black's replies, played by the loopback server.
const BLACK_REPLIES: &[&str] = &["e7e5", "b8c6", "g8f6"];

// ── Transport ───────────────────────────────────────────────────────

struct LoopbackTransport {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), ChessSyncError> {
        self.to_server
            .send(message)
            .map_err(|e| ChessSyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChessSyncError>> {
        // The server task ending reads as a normal close.
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ChessSyncError> {
        Ok(())
    }
}

struct LoopbackConnector;

#[async_trait]
impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn connect(&self, endpoint: &str) -> Result<LoopbackTransport, ChessSyncError> {
        tracing::info!(endpoint, "opening loopback connection");
        let (to_server, server_inbox) = mpsc::unbounded_channel();
        let (server_outbox, from_server) = mpsc::unbounded_channel();
        tokio::spawn(opponent(server_inbox, server_outbox));
        Ok(LoopbackTransport {
            to_server,
            from_server,
        })
    }
}

// ── Server side ─────────────────────────────────────────────────────

async fn opponent(
    mut inbox: mpsc::UnboundedReceiver<String>,
    outbox: mpsc::UnboundedSender<String>,
) {
    let validator = MoveValidator::new();
    let mut position = Position::initial();
    let mut replies = BLACK_REPLIES.iter();

    let reply = |message: ServerMessage| {
        if let Ok(text) = serde_json::to_string(&message) {
            let _ = outbox.send(text);
        }
    };

    while let Some(text) = inbox.recv().await {
        let Ok(message) = serde_json::from_str::<ClientMessage>(&text) else {
            continue;
        };
        match message {
            ClientMessage::InitGame {} => reply(ServerMessage::InitGame(InitGamePayload {
                color: Color::White,
                white_time_ms: 180_000,
                black_time_ms: 180_000,
                game_id: Some("loopback".into()),
            })),
            ClientMessage::Move(mv) => {
                let Ok(applied) = validator.validate(&position, mv) else {
                    reply(ServerMessage::Error(ErrorPayload {
                        message: format!("illegal move {mv}"),
                    }));
                    continue;
                };
                position = applied.position;
                reply(ServerMessage::Move(applied.mv));

                if let PositionStatus::Checkmate { winner } = position.status() {
                    reply(ServerMessage::GameOver(GameOverPayload {
                        winner: Winner::from(winner),
                        reason: "Checkmate".into(),
                    }));
                    continue;
                }

                let answer = replies
                    .next()
                    .and_then(|text| text.parse::<Move>().ok())
                    .and_then(|mv| validator.validate(&position, mv).ok());
                if let Some(answer) = answer {
                    position = answer.position;
                    reply(ServerMessage::Move(answer.mv));
                }
            }
            other => tracing::debug!(kind = other.type_tag(), "loopback server ignoring"),
        }
    }
}

// ── Client side ─────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ChessSyncConfig::new("loopback://local");
    let (mut client, mut events) = ChessClient::start(LoopbackConnector, config);
    let mut script = WHITE_MOVES.iter();

    client.new_game()?;

    while let Some(event) = events.recv().await {
        match event {
            ChessEvent::GameStarted { color, .. } => {
                println!("Playing {color}");
                if let Some(first) = script.next() {
                    client.submit_move(first.parse()?)?;
                }
            }
            ChessEvent::ServerMoveApplied { applied } => {
                println!("{:>5} {}", applied.color.to_string(), applied.san);
                if applied.color == Color::Black {
                    if let Some(next) = script.next() {
                        client.submit_move(next.parse()?)?;
                    }
                }
            }
            ChessEvent::LocalMoveRejected { mv, reason } => {
                println!("Move {mv} rejected: {reason}");
            }
            ChessEvent::GameOver { winner, reason } => {
                let view = client.view();
                println!("Game over: {winner:?} by {reason}");
                println!("Moves: {}", view.moves.join(" "));
                println!(
                    "Clocks: white {} / black {}",
                    format_clock(view.clocks.white_ms),
                    format_clock(view.clocks.black_ms)
                );
                client.shutdown().await;
            }
            ChessEvent::Shutdown => break,
            other => tracing::debug!(?other, "event"),
        }
    }

    Ok(())
}
