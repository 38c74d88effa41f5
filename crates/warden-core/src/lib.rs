pub mod errors;
pub mod events;
pub mod identity;
pub mod ids;
pub mod mock;
pub mod movement;
pub mod session;
pub mod storage;

pub use errors::{LogStoreError, SessionError};
pub use events::{LogEvent, PeerSample, Position, PositionSample, SessionEvent, TelemetryUpdate};
pub use identity::Identity;
pub use ids::{Generation, SubscriberId};
pub use movement::{Direction, MovementIntent};
pub use session::{SessionConnection, SessionConnector, SessionHandle};
pub use storage::LogStore;
