use std::sync::Arc;

use tokio::sync::mpsc;

use crate::errors::SessionError;
use crate::events::{PeerSample, Position, SessionEvent};
use crate::identity::Identity;
use crate::movement::MovementIntent;

/// A freshly started connection attempt: the handle plus its event stream.
///
/// A closed `events` stream means the session has ended.
pub struct SessionConnection {
    pub handle: Arc<dyn SessionHandle>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Starts connection attempts against the remote world server.
pub trait SessionConnector: Send + Sync {
    /// Begin connecting as `identity`. Must not block; progress is reported
    /// through the returned event stream.
    fn connect(&self, identity: &Identity) -> Result<SessionConnection, SessionError>;
}

/// One live (or dying) connection to the world server.
pub trait SessionHandle: Send + Sync {
    fn identity(&self) -> &Identity;

    fn set_movement(&self, intent: MovementIntent) -> Result<(), SessionError>;

    fn clear_movement(&self) -> Result<(), SessionError>;

    /// Own entity position, or `None` while the entity is unavailable
    /// (not yet spawned, mid-teleport).
    fn self_position(&self) -> Option<Position>;

    fn peers(&self) -> Vec<PeerSample>;

    /// Close the connection. Idempotent.
    fn disconnect(&self) -> Result<(), SessionError>;
}
