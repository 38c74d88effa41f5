//! Position sampling for the live view.

use warden_core::{PositionSample, SessionHandle};

/// Read the session's own position and visible peers.
///
/// Returns `None` while the entity is unavailable; the tick is skipped
/// rather than reported.
pub fn sample(handle: &dyn SessionHandle) -> Option<PositionSample> {
    let self_position = handle.self_position()?;
    Some(PositionSample {
        self_position,
        peers: handle.peers(),
    })
}
