#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the chess sync client integration tests.
//!
//! [`MockConnector`] hands out channel-backed [`MockTransport`]s according to
//! a plan of accepted and refused attempts. Every accepted connection shows
//! up on the harness as a [`MockServer`], which the test uses to push
//! envelopes, close the connection, and read what the client sent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chess_sync_client::connection::close_code;
use chess_sync_client::{ChessEvent, ChessSyncError, Connector, Transport};
use serde_json::{json, Value};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(30);

// ── MockTransport ───────────────────────────────────────────────────

/// What the scripted server does next on one connection.
#[derive(Debug)]
pub enum Inbound {
    Text(String),
    Close(u16),
}

/// A channel-backed transport. Cancel-safe because `mpsc::Receiver::recv` is.
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), ChessSyncError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChessSyncError::AlreadyClosed);
        }
        self.outbound
            .send(message)
            .map_err(|e| ChessSyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChessSyncError>> {
        match self.inbound.recv().await {
            Some(Inbound::Text(text)) => Some(Ok(text)),
            Some(Inbound::Close(close_code::NORMAL)) => None,
            Some(Inbound::Close(code)) => Some(Err(ChessSyncError::TransportClosed {
                code,
                reason: "mock server closed".into(),
            })),
            // The test dropped its server handle; behave like an idle peer.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ChessSyncError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// ── MockServer ──────────────────────────────────────────────────────

/// The server side of one accepted mock connection.
pub struct MockServer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MockServer {
    /// Deliver one envelope to the client.
    pub fn push(&self, envelope: Value) {
        self.push_raw(envelope.to_string());
    }

    /// Deliver raw text, valid or not.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Text(text.into()));
    }

    /// Close the connection with `code`.
    pub fn close(&self, code: u16) {
        let _ = self.inbound.send(Inbound::Close(code));
    }

    /// Whether the client closed this connection.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Next envelope the client sent, parsed.
    pub async fn next_sent(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.outbound.recv())
            .await
            .expect("timed out waiting for the client to send")
            .expect("client transport dropped");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Next sent envelope, asserting its type.
    pub async fn expect_sent(&mut self, kind: &str) -> Value {
        let envelope = self.next_sent().await;
        assert_eq!(envelope["type"], kind, "unexpected envelope {envelope}");
        envelope
    }

    /// A sent envelope that is already waiting, if any.
    pub fn try_sent(&mut self) -> Option<Value> {
        self.outbound
            .try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).expect("client sent invalid JSON"))
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Outcome of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Accept,
    Refuse,
}

/// Connector that follows a [`Plan`] list. Attempts past the end are refused.
pub struct MockConnector {
    plan: StdMutex<VecDeque<Plan>>,
    accepted: mpsc::UnboundedSender<MockServer>,
    attempts: Arc<AtomicU32>,
}

/// Test-side view of a [`MockConnector`].
pub struct Harness {
    accepted: mpsc::UnboundedReceiver<MockServer>,
    attempts: Arc<AtomicU32>,
}

impl Harness {
    /// Wait for the next accepted connection.
    pub async fn next_server(&mut self) -> MockServer {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Connection attempts so far, accepted or refused.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

pub fn mock_connector(plan: Vec<Plan>) -> (MockConnector, Harness) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicU32::new(0));
    let connector = MockConnector {
        plan: StdMutex::new(plan.into()),
        accepted: accepted_tx,
        attempts: Arc::clone(&attempts),
    };
    let harness = Harness {
        accepted: accepted_rx,
        attempts,
    };
    (connector, harness)
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, endpoint: &str) -> Result<MockTransport, ChessSyncError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.plan.lock().unwrap().pop_front().unwrap_or(Plan::Refuse);
        if next == Plan::Refuse {
            return Err(ChessSyncError::Connect(format!("{endpoint} refused")));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.accepted.send(MockServer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            closed: Arc::clone(&closed),
        });
        Ok(MockTransport {
            inbound: inbound_rx,
            outbound: outbound_tx,
            closed,
        })
    }
}

// ── Event helpers ───────────────────────────────────────────────────

/// Next event that is not a clock tick.
pub async fn next_event(rx: &mut mpsc::Receiver<ChessEvent>) -> ChessEvent {
    loop {
        let event = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed");
        if !matches!(event, ChessEvent::Clock(_)) {
            return event;
        }
    }
}

/// Skip events until one matches `pred`.
pub async fn wait_for(
    rx: &mut mpsc::Receiver<ChessEvent>,
    pred: impl Fn(&ChessEvent) -> bool,
) -> ChessEvent {
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Collect non-clock events until one matches `pred`, inclusive.
pub async fn collect_until(
    rx: &mut mpsc::Receiver<ChessEvent>,
    pred: impl Fn(&ChessEvent) -> bool,
) -> Vec<ChessEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

// ── Envelope builders ───────────────────────────────────────────────

pub fn init_game_json(color: &str) -> Value {
    json!({
        "type": "INIT_GAME",
        "payload": { "color": color, "whiteTimeMs": 600000, "blackTimeMs": 600000, "gameId": "game-1" }
    })
}

pub fn move_json(from: &str, to: &str) -> Value {
    json!({ "type": "MOVE", "payload": { "from": from, "to": to } })
}

pub fn game_update_json(fen: &str, white_ms: u64, black_ms: u64) -> Value {
    json!({
        "type": "GAME_UPDATE",
        "payload": { "fen": fen, "whiteTimeMs": white_ms, "blackTimeMs": black_ms }
    })
}

pub fn game_over_json(winner: &str, reason: &str) -> Value {
    json!({ "type": "GAME_OVER", "payload": { "winner": winner, "reason": reason } })
}

pub fn games_list_json(ids: &[&str]) -> Value {
    let games: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "fen": "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
                "turn": "w",
                "status": "In Progress"
            })
        })
        .collect();
    json!({ "type": "GAMES_LIST", "payload": { "games": games } })
}

pub fn error_json(message: &str) -> Value {
    json!({ "type": "ERROR", "payload": { "message": message } })
}

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
