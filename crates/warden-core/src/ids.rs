use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier for one telemetry subscriber (one push-channel endpoint).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new() -> Self {
        Self(format!("sub_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tag distinguishing successive connection attempts.
///
/// Every timer and forwarded session event carries the generation it was
/// created for; anything tagged with a generation other than the live one is
/// stale and must be dropped.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const ZERO: Generation = Generation(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_id_has_prefix() {
        let id = SubscriberId::new();
        assert!(id.as_str().starts_with("sub_"), "got: {id}");
    }

    #[test]
    fn subscriber_ids_are_unique() {
        assert_ne!(SubscriberId::new(), SubscriberId::new());
    }

    #[test]
    fn generation_is_monotonic() {
        let g0 = Generation::ZERO;
        let g1 = g0.next();
        let g2 = g1.next();
        assert!(g0 < g1 && g1 < g2);
        assert_eq!(g2.get(), 2);
    }

    #[test]
    fn generation_serializes_as_number() {
        let json = serde_json::to_string(&Generation::ZERO.next()).unwrap();
        assert_eq!(json, "1");
    }
}
