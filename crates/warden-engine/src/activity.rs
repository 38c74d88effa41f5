//! Anti-idle movement pulses.
//!
//! Many servers drop clients that stand still. While a session is active the
//! controller fires a pulse every period: pick a random horizontal direction,
//! maybe jump, hold it briefly, then release.

use std::time::Duration;

use rand::Rng;
use warden_core::{Direction, MovementIntent, SessionHandle};

#[derive(Clone, Debug)]
pub struct ActivityConfig {
    pub period: Duration,
    /// How long the intent is held before all intents are cleared.
    pub release_after: Duration,
    pub jump_probability: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(8),
            release_after: Duration::from_secs(1),
            jump_probability: 0.3,
        }
    }
}

/// Uniformly pick a direction and add a jump with `jump_probability`.
pub fn choose_intent<R: Rng + ?Sized>(rng: &mut R, jump_probability: f64) -> MovementIntent {
    let direction = Direction::ALL[rng.gen_range(0..Direction::ALL.len())];
    let jump = rng.gen_bool(jump_probability.clamp(0.0, 1.0));
    MovementIntent { direction, jump }
}

/// Issue one pulse. Returns false when the session's entity is not available
/// and the pulse was skipped.
pub fn pulse(handle: &dyn SessionHandle, intent: MovementIntent) -> bool {
    if handle.self_position().is_none() {
        return false;
    }
    if let Err(e) = handle
        .clear_movement()
        .and_then(|()| handle.set_movement(intent))
    {
        tracing::debug!(identity = %handle.identity(), error = %e, "movement pulse failed");
    }
    true
}

/// Return the session to rest.
pub fn release(handle: &dyn SessionHandle) {
    if let Err(e) = handle.clear_movement() {
        tracing::debug!(identity = %handle.identity(), error = %e, "movement release failed");
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use warden_core::mock::{MockBehavior, MockCall, MockConnector};
    use warden_core::{Identity, SessionConnector};

    use super::*;

    #[test]
    fn directions_cover_all_four() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(choose_intent(&mut rng, 0.3).direction);
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn jump_probability_extremes() {
        let mut rng = StdRng::seed_from_u64(2);
        assert!((0..100).all(|_| !choose_intent(&mut rng, 0.0).jump));
        assert!((0..100).all(|_| choose_intent(&mut rng, 1.0).jump));
    }

    #[test]
    fn jump_rate_tracks_probability() {
        let mut rng = StdRng::seed_from_u64(3);
        let jumps = (0..10_000).filter(|_| choose_intent(&mut rng, 0.3).jump).count();
        assert!((2_500..3_500).contains(&jumps), "jumps = {jumps}");
    }

    #[test]
    fn pulse_clears_then_sets() {
        let connector = MockConnector::default();
        let conn = connector.connect(&Identity::from_raw("a")).unwrap();
        let intent = MovementIntent {
            direction: Direction::Left,
            jump: true,
        };

        assert!(pulse(conn.handle.as_ref(), intent));

        let calls = connector.latest().unwrap().calls();
        assert_eq!(
            calls,
            vec![
                MockCall::ReadPosition,
                MockCall::ClearMovement,
                MockCall::SetMovement(intent)
            ]
        );
    }

    #[test]
    fn pulse_skipped_without_entity() {
        let connector = MockConnector::new(MockBehavior {
            spawn_on_connect: false,
            ..Default::default()
        });
        let conn = connector.connect(&Identity::from_raw("a")).unwrap();
        let intent = choose_intent(&mut StdRng::seed_from_u64(4), 0.3);

        assert!(!pulse(conn.handle.as_ref(), intent));
        assert!(connector.latest().unwrap().movements().is_empty());
    }

    #[test]
    fn release_on_closed_session_is_harmless() {
        let connector = MockConnector::default();
        let conn = connector.connect(&Identity::from_raw("a")).unwrap();
        conn.handle.disconnect().unwrap();
        release(conn.handle.as_ref());
        assert_eq!(connector.latest().unwrap().count(&MockCall::ClearMovement), 1);
    }
}
