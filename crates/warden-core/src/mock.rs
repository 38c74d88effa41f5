//! Scripted connector for deterministic testing without a world server.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::errors::SessionError;
use crate::events::{PeerSample, Position, SessionEvent};
use crate::identity::Identity;
use crate::movement::MovementIntent;
use crate::session::{SessionConnection, SessionConnector, SessionHandle};

const MOCK_EVENT_QUEUE: usize = 64;

/// How freshly created mock sessions behave.
#[derive(Clone, Debug)]
pub struct MockBehavior {
    /// Emit `LoggedIn` then `Spawned` immediately on connect.
    pub spawn_on_connect: bool,
    /// Own position once spawned. `None` simulates a missing entity.
    pub position: Option<Position>,
    pub peers: Vec<PeerSample>,
    /// Make `disconnect()` fail.
    pub fail_disconnect: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            spawn_on_connect: true,
            position: Some(Position::new(0.0, 64.0, 0.0)),
            peers: Vec::new(),
            fail_disconnect: false,
        }
    }
}

/// Every call made on a [`MockSession`], in order.
#[derive(Clone, Debug, PartialEq)]
pub enum MockCall {
    SetMovement(MovementIntent),
    ClearMovement,
    ReadPosition,
    ReadPeers,
    Disconnect,
}

/// Connector that hands out [`MockSession`]s and remembers all of them.
pub struct MockConnector {
    behavior: MockBehavior,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    failing_connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            sessions: Mutex::new(Vec::new()),
            failing_connects: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` calls to `connect` fail outright.
    pub fn fail_next_connects(&self, n: usize) {
        self.failing_connects.store(n, Ordering::Relaxed);
    }

    /// Number of connect attempts, including failed ones.
    pub fn connect_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<MockSession>> {
        self.sessions.lock().last().cloned()
    }

    /// Sessions that have not been disconnected.
    pub fn live_count(&self) -> usize {
        self.sessions
            .lock()
            .iter()
            .filter(|s| !s.is_disconnected())
            .count()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new(MockBehavior::default())
    }
}

impl SessionConnector for MockConnector {
    fn connect(&self, identity: &Identity) -> Result<SessionConnection, SessionError> {
        let behavior = &self.behavior;
        let (tx, rx) = mpsc::channel(MOCK_EVENT_QUEUE);
        let session = Arc::new(MockSession::new(identity.clone(), tx, behavior));
        self.sessions.lock().push(Arc::clone(&session));

        let failing = self.failing_connects.load(Ordering::Relaxed);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::Relaxed);
            session.disconnected.store(true, Ordering::Relaxed);
            return Err(SessionError::ConnectFailed("mock refused".into()));
        }

        if behavior.spawn_on_connect {
            session.spawn();
        }

        Ok(SessionConnection {
            handle: session,
            events: rx,
        })
    }
}

/// A scripted session. Tests drive it with [`MockSession::emit`].
pub struct MockSession {
    identity: Identity,
    events: mpsc::Sender<SessionEvent>,
    spawned: AtomicBool,
    disconnected: AtomicBool,
    fail_disconnect: bool,
    position: RwLock<Option<Position>>,
    peers: Vec<PeerSample>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockSession {
    fn new(identity: Identity, events: mpsc::Sender<SessionEvent>, behavior: &MockBehavior) -> Self {
        Self {
            identity,
            events,
            spawned: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            fail_disconnect: behavior.fail_disconnect,
            position: RwLock::new(behavior.position),
            peers: behavior.peers.clone(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Emit `LoggedIn` + `Spawned` and make the entity visible.
    pub fn spawn(&self) {
        self.spawned.store(true, Ordering::Relaxed);
        self.emit(SessionEvent::LoggedIn);
        self.emit(SessionEvent::Spawned);
    }

    /// Push an event onto the session's stream. Returns false if nobody is
    /// listening any more.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.events.try_send(event).is_ok()
    }

    pub fn set_position(&self, position: Option<Position>) {
        *self.position.write() = position;
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn movements(&self) -> Vec<MovementIntent> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::SetMovement(intent) => Some(*intent),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &MockCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }
}

impl SessionHandle for MockSession {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn set_movement(&self, intent: MovementIntent) -> Result<(), SessionError> {
        self.record(MockCall::SetMovement(intent));
        if self.is_disconnected() {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn clear_movement(&self) -> Result<(), SessionError> {
        self.record(MockCall::ClearMovement);
        if self.is_disconnected() {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn self_position(&self) -> Option<Position> {
        self.record(MockCall::ReadPosition);
        if !self.spawned.load(Ordering::Relaxed) || self.is_disconnected() {
            return None;
        }
        *self.position.read()
    }

    fn peers(&self) -> Vec<PeerSample> {
        self.record(MockCall::ReadPeers);
        self.peers.clone()
    }

    fn disconnect(&self) -> Result<(), SessionError> {
        self.record(MockCall::Disconnect);
        self.disconnected.store(true, Ordering::Relaxed);
        if self.fail_disconnect {
            return Err(SessionError::Transport("mock disconnect failure".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_spawns_by_default() {
        let connector = MockConnector::default();
        let mut conn = connector.connect(&Identity::from_raw("a")).unwrap();
        assert_eq!(conn.events.recv().await, Some(SessionEvent::LoggedIn));
        assert_eq!(conn.events.recv().await, Some(SessionEvent::Spawned));
        assert!(conn.handle.self_position().is_some());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn unspawned_session_has_no_position() {
        let connector = MockConnector::new(MockBehavior {
            spawn_on_connect: false,
            ..Default::default()
        });
        let conn = connector.connect(&Identity::from_raw("a")).unwrap();
        assert!(conn.handle.self_position().is_none());
    }

    #[test]
    fn failed_connects_are_counted() {
        let connector = MockConnector::default();
        connector.fail_next_connects(1);
        assert!(connector.connect(&Identity::from_raw("a")).is_err());
        assert!(connector.connect(&Identity::from_raw("b")).is_ok());
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.live_count(), 1);
    }

    #[test]
    fn calls_are_recorded() {
        let connector = MockConnector::default();
        let conn = connector.connect(&Identity::from_raw("a")).unwrap();
        conn.handle.clear_movement().unwrap();
        conn.handle.disconnect().unwrap();
        assert!(conn.handle.clear_movement().is_err());
        let session = connector.latest().unwrap();
        assert_eq!(session.count(&MockCall::ClearMovement), 2);
        assert_eq!(session.count(&MockCall::Disconnect), 1);
        assert!(session.is_disconnected());
    }
}
