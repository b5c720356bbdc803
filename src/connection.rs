//! Connection ownership and bounded reconnection.
//!
//! [`ConnectionManager`] owns at most one live transport. When a connection
//! drops with anything other than a normal close it schedules a single
//! reconnect timer using exponential backoff; once the attempt budget is
//! spent it reports [`ConnectionEvent::Unreachable`] and stays closed until
//! [`connect`](ConnectionManager::connect) is called again.
//!
//! The manager is driven from one task. [`next_event`](ConnectionManager::next_event)
//! is cancel-safe so it can sit in a `tokio::select!` next to other sources;
//! the actual reconnect attempt runs in [`reconnect`](ConnectionManager::reconnect),
//! which the caller awaits outside the select so a slow handshake is never
//! cancelled halfway.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ChessSyncError, Result};
use crate::transport::{Connector, Transport};

/// WebSocket close codes the manager distinguishes.
pub mod close_code {
    /// Deliberate close. Never triggers a reconnect.
    pub const NORMAL: u16 = 1000;
    /// Close frame without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
}

/// Connectivity as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connecting,
    Open,
    #[default]
    Closed,
    /// Waiting for, or performing, reconnect attempt `n` (1-based).
    Reconnecting(u32),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
            Self::Reconnecting(n) => write!(f, "reconnecting (attempt {n})"),
        }
    }
}

/// Exponential backoff with a cap and a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempt` (0-based): `min(base * 2^attempt, cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// A fixed delay between attempts.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            base: delay,
            cap: delay,
            max_attempts,
        }
    }
}

/// Something the caller should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A transport opened. `reconnected` is false only for the first one.
    Opened { reconnected: bool },
    /// One inbound text message.
    Message(String),
    Closed { code: u16, reason: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The reconnect timer fired; call [`ConnectionManager::reconnect`].
    RetryDue,
    /// The attempt budget is spent.
    Unreachable,
}

/// Owner of the live transport and the reconnect timer.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    endpoint: String,
    policy: BackoffPolicy,
    connect_timeout: Duration,
    state: ConnectionState,
    transport: Option<C::Transport>,
    /// Reconnect attempts used since the last successful open.
    attempts: u32,
    /// The single pending reconnect deadline.
    retry_at: Option<Instant>,
    has_opened: bool,
    pending: VecDeque<ConnectionEvent>,
}

impl<C: Connector> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .field("retry_at", &self.retry_at)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, endpoint: impl Into<String>, policy: BackoffPolicy) -> Self {
        Self {
            connector,
            endpoint: endpoint.into(),
            policy,
            connect_timeout: Duration::from_secs(10),
            state: ConnectionState::Closed,
            transport: None,
            attempts: 0,
            retry_at: None,
            has_opened: false,
            pending: VecDeque::new(),
        }
    }

    /// Give up on a single connection attempt after `timeout`.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Closed with no reconnect scheduled: nothing will happen until
    /// [`connect`](Self::connect) is called.
    pub fn is_idle(&self) -> bool {
        self.state == ConnectionState::Closed && self.retry_at.is_none()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Open a connection now, cancelling any scheduled reconnect and
    /// restoring the full attempt budget. An existing transport is closed
    /// first.
    ///
    /// Resulting events are queued; drain them with
    /// [`take_pending`](Self::take_pending) or [`next_event`](Self::next_event).
    ///
    /// # Errors
    ///
    /// Returns the connector's error. A reconnect has already been scheduled
    /// when this returns `Err`.
    pub async fn connect(&mut self) -> Result<()> {
        self.retry_at = None;
        self.attempts = 0;
        self.open().await
    }

    /// Perform the scheduled reconnect attempt.
    ///
    /// # Errors
    ///
    /// Returns the connector's error. The next attempt (or
    /// [`ConnectionEvent::Unreachable`]) has been queued when this returns `Err`.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.retry_at = None;
        self.open().await
    }

    /// Send one text message. Returns `false` without sending when the
    /// connection is not open. A failed write is treated as a dropped
    /// connection.
    pub async fn send(&mut self, text: String) -> bool {
        let open = self.state == ConnectionState::Open;
        let Some(transport) = self.transport.as_mut().filter(|_| open) else {
            debug!(state = %self.state, "dropping outbound message, connection not open");
            return false;
        };
        match transport.send(text).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "send failed");
                self.on_dropped(close_code::ABNORMAL, err.to_string());
                false
            }
        }
    }

    /// Close deliberately: cancel the reconnect timer, close the transport
    /// with the normal code, and forget queued events.
    pub async fn close(&mut self) {
        self.retry_at = None;
        self.attempts = 0;
        self.pending.clear();
        self.release().await;
    }

    /// Events queued by the last `connect`, `reconnect`, or `send`.
    pub fn take_pending(&mut self) -> Vec<ConnectionEvent> {
        self.pending.drain(..).collect()
    }

    /// Wait for the next event. Cancel-safe.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }

            if let Some(transport) = self.transport.as_mut() {
                match transport.recv().await {
                    Some(Ok(text)) => return ConnectionEvent::Message(text),
                    None => {
                        info!("server closed the connection normally");
                        self.transport = None;
                        self.state = ConnectionState::Closed;
                        return ConnectionEvent::Closed {
                            code: close_code::NORMAL,
                            reason: String::new(),
                        };
                    }
                    Some(Err(ChessSyncError::TransportClosed { code, reason })) => {
                        self.on_dropped(code, reason);
                    }
                    Some(Err(err)) => self.on_dropped(close_code::ABNORMAL, err.to_string()),
                }
                continue;
            }

            if let Some(at) = self.retry_at {
                tokio::time::sleep_until(at).await;
                return ConnectionEvent::RetryDue;
            }

            std::future::pending::<()>().await;
        }
    }

    async fn open(&mut self) -> Result<()> {
        self.release().await;
        self.state = match self.attempts {
            0 => ConnectionState::Connecting,
            n => ConnectionState::Reconnecting(n),
        };
        debug!(endpoint = %self.endpoint, state = %self.state, "opening connection");

        let connecting = self.connector.connect(&self.endpoint);
        let attempt = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .unwrap_or_else(|_| Err(ChessSyncError::Timeout));

        match attempt {
            Ok(transport) => {
                info!(endpoint = %self.endpoint, "connection open");
                self.transport = Some(transport);
                self.state = ConnectionState::Open;
                self.attempts = 0;
                let reconnected = self.has_opened;
                self.has_opened = true;
                self.pending.push_back(ConnectionEvent::Opened { reconnected });
                Ok(())
            }
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "connection attempt failed");
                self.state = ConnectionState::Closed;
                self.schedule_reconnect();
                Err(err)
            }
        }
    }

    fn on_dropped(&mut self, code: u16, reason: String) {
        warn!(code, reason = %reason, "connection lost");
        self.transport = None;
        self.state = ConnectionState::Closed;
        self.pending
            .push_back(ConnectionEvent::Closed { code, reason });
        if code == close_code::NORMAL {
            return;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.attempts >= self.policy.max_attempts {
            warn!(attempts = self.attempts, "reconnection budget exhausted");
            self.retry_at = None;
            self.state = ConnectionState::Closed;
            self.pending.push_back(ConnectionEvent::Unreachable);
            return;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting(self.attempts);
        self.retry_at = Some(Instant::now() + delay);
        info!(attempt = self.attempts, ?delay, "reconnect scheduled");
        self.pending.push_back(ConnectionEvent::ReconnectScheduled {
            attempt: self.attempts,
            delay,
        });
    }

    /// Close and drop the current transport, if any.
    async fn release(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(err) = transport.close().await {
                debug!(error = %err, "error closing previous transport");
            }
        }
        self.state = ConnectionState::Closed;
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
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;

    use super::*;

    /// What the scripted peer does once connected.
    #[derive(Clone)]
    enum Peer {
        /// Deliver messages, then close with `code`.
        Then(Vec<String>, u16),
        /// Deliver messages, then stay open.
        Stay(Vec<String>),
    }

    struct ScriptedTransport {
        incoming: VecDeque<String>,
        closes_with: Option<u16>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            if let Some(msg) = self.incoming.pop_front() {
                return Some(Ok(msg));
            }
            match self.closes_with.take() {
                Some(close_code::NORMAL) => None,
                Some(code) => Some(Err(ChessSyncError::TransportClosed {
                    code,
                    reason: "scripted".into(),
                })),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Pops one outcome per connect; `None` means the attempt fails.
    struct ScriptedConnector {
        outcomes: StdMutex<VecDeque<Option<Peer>>>,
        attempts: Arc<AtomicU32>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    impl ScriptedConnector {
        fn new(outcomes: Vec<Option<Peer>>) -> Self {
            Self {
                outcomes: StdMutex::new(outcomes.into()),
                attempts: Arc::new(AtomicU32::new(0)),
                sent: Arc::new(StdMutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Transport = ScriptedTransport;

        async fn connect(&self, _endpoint: &str) -> Result<ScriptedTransport> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.outcomes.lock().unwrap().pop_front().flatten();
            let (incoming, closes_with) = match next {
                Some(Peer::Then(msgs, code)) => (msgs, Some(code)),
                Some(Peer::Stay(msgs)) => (msgs, None),
                None => return Err(ChessSyncError::Connect("refused".into())),
            };
            Ok(ScriptedTransport {
                incoming: incoming.into(),
                closes_with,
                sent: Arc::clone(&self.sent),
            })
        }
    }

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(1),
            max_attempts,
        }
    }

    /// Pull events, performing reconnects when due, until `stop` matches.
    async fn run_until(
        manager: &mut ConnectionManager<ScriptedConnector>,
        stop: impl Fn(&ConnectionEvent) -> bool,
    ) -> Vec<ConnectionEvent> {
        let mut seen = Vec::new();
        loop {
            let event = manager.next_event().await;
            if event == ConnectionEvent::RetryDue {
                let _ = manager.reconnect().await;
                continue;
            }
            let done = stop(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    #[test]
    fn idle_manager_has_nothing_to_report() {
        let mut manager =
            ConnectionManager::new(ScriptedConnector::new(Vec::new()), "ws://test", policy(3));
        assert!(manager.is_idle());
        let mut next = tokio_test::task::spawn(manager.next_event());
        tokio_test::assert_pending!(next.poll());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(4), Duration::from_secs(16));
        assert_eq!(p.delay_for(5), Duration::from_secs(30));
        assert_eq!(p.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn backoff_is_monotonic() {
        let p = BackoffPolicy {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(20),
            max_attempts: 10,
        };
        let delays: Vec<_> = (0..64).map(|n| p.delay_for(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= p.cap));
    }

    #[test]
    fn fixed_policy_never_grows() {
        let p = BackoffPolicy::fixed(Duration::from_secs(3), 5);
        assert_eq!(p.delay_for(0), p.delay_for(4));
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_messages_then_normal_close_without_reconnect() {
        let connector = ScriptedConnector::new(vec![Some(Peer::Then(
            vec!["one".into(), "two".into()],
            close_code::NORMAL,
        ))]);
        let attempts = Arc::clone(&connector.attempts);
        let mut manager = ConnectionManager::new(connector, "ws://test", policy(3));

        manager.connect().await.unwrap();
        assert!(manager.is_open());

        let events = run_until(&mut manager, |e| matches!(e, ConnectionEvent::Closed { .. })).await;
        assert_eq!(
            events,
            vec![
                ConnectionEvent::Opened { reconnected: false },
                ConnectionEvent::Message("one".into()),
                ConnectionEvent::Message("two".into()),
                ConnectionEvent::Closed {
                    code: close_code::NORMAL,
                    reason: String::new()
                },
            ]
        );
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.is_idle());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_reconnects_after_backoff() {
        let connector = ScriptedConnector::new(vec![
            Some(Peer::Then(vec![], close_code::ABNORMAL)),
            Some(Peer::Stay(vec!["back".into()])),
        ]);
        let mut manager = ConnectionManager::new(connector, "ws://test", policy(3));
        manager.connect().await.unwrap();

        let started = Instant::now();
        let events = run_until(&mut manager, |e| matches!(e, ConnectionEvent::Message(_))).await;
        assert_eq!(
            events,
            vec![
                ConnectionEvent::Opened { reconnected: false },
                ConnectionEvent::Closed {
                    code: close_code::ABNORMAL,
                    reason: "scripted".into()
                },
                ConnectionEvent::ReconnectScheduled {
                    attempt: 1,
                    delay: Duration::from_millis(100)
                },
                ConnectionEvent::Opened { reconnected: true },
                ConnectionEvent::Message("back".into()),
            ]
        );
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(manager.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_reports_unreachable() {
        let connector = ScriptedConnector::new(vec![
            Some(Peer::Then(vec![], close_code::ABNORMAL)),
            None,
            None,
            None,
        ]);
        let attempts = Arc::clone(&connector.attempts);
        let mut manager = ConnectionManager::new(connector, "ws://test", policy(3));
        manager.connect().await.unwrap();

        let events = run_until(&mut manager, |e| *e == ConnectionEvent::Unreachable).await;
        let scheduled: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ConnectionEvent::ReconnectScheduled { attempt, delay } => Some((*attempt, *delay)),
                _ => None,
            })
            .collect();
        assert_eq!(
            scheduled,
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200)),
                (3, Duration::from_millis(400)),
            ]
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.is_idle());

        // Nothing further is scheduled.
        let idle = tokio::time::timeout(Duration::from_secs(60), manager.next_event()).await;
        assert!(idle.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_connect_schedules_retry() {
        let connector = ScriptedConnector::new(vec![None, Some(Peer::Stay(vec![]))]);
        let mut manager = ConnectionManager::new(connector, "ws://test", policy(2));

        assert!(manager.connect().await.is_err());
        assert_eq!(manager.state(), ConnectionState::Reconnecting(1));
        assert!(!manager.is_idle());

        let events = run_until(&mut manager, |e| matches!(e, ConnectionEvent::Opened { .. })).await;
        assert_eq!(
            events.last(),
            Some(&ConnectionEvent::Opened { reconnected: false })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_connect_cancels_pending_timer() {
        let connector = ScriptedConnector::new(vec![None, Some(Peer::Stay(vec![]))]);
        let attempts = Arc::clone(&connector.attempts);
        let mut manager = ConnectionManager::new(connector, "ws://test", policy(5));

        assert!(manager.connect().await.is_err());
        manager.connect().await.unwrap();
        manager.take_pending();
        assert!(manager.is_open());

        // The old timer must not fire a second attempt.
        let idle = tokio::time::timeout(Duration::from_secs(10), manager.next_event()).await;
        assert!(idle.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn send_is_a_no_op_when_not_open() {
        let connector = ScriptedConnector::new(vec![None]);
        let sent = Arc::clone(&connector.sent);
        let mut manager = ConnectionManager::new(connector, "ws://test", policy(1));
        let _ = manager.connect().await;

        assert!(!manager.send("hello".into()).await);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_reconnection() {
        let connector = ScriptedConnector::new(vec![None, Some(Peer::Stay(vec![]))]);
        let attempts = Arc::clone(&connector.attempts);
        let mut manager = ConnectionManager::new(connector, "ws://test", policy(5));
        let _ = manager.connect().await;

        manager.close().await;
        let idle = tokio::time::timeout(Duration::from_secs(30), manager.next_event()).await;
        assert!(idle.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }
}
