use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound (exclusive) of the numeric suffix of a generated display name.
pub const IDENTITY_SUFFIX_SPACE: u32 = 9999;

/// Display name presented by one session attempt.
///
/// Identities are cosmetic: they are regenerated per attempt and need not be
/// unique across history.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Draw a fresh `<prefix>_<n>` name from `rng`.
    pub fn generate<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> Self {
        let suffix = rng.gen_range(0..IDENTITY_SUFFIX_SPACE);
        Self(format!("{prefix}_{suffix}"))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for Identity {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generated_name_has_prefix_and_bounded_suffix() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let id = Identity::generate("ByteBot", &mut rng);
            let suffix = id.as_str().strip_prefix("ByteBot_").unwrap();
            let n: u32 = suffix.parse().unwrap();
            assert!(n < IDENTITY_SUFFIX_SPACE);
        }
    }

    #[test]
    fn same_seed_same_identity() {
        let a = Identity::generate("x", &mut StdRng::seed_from_u64(42));
        let b = Identity::generate("x", &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn compares_with_str() {
        let id = Identity::from_raw("ByteBot_12");
        assert!(id == *"ByteBot_12");
    }
}
