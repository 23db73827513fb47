use std::fmt;

use serde::{Deserialize, Serialize};

/// The reserved address naming every replica at once.
pub const BROADCAST: &str = "FFFF";

/// Replica identifier: four hex characters assigned at startup.
///
/// The distinguished value `"FFFF"` addresses all peers and doubles as the
/// "leader unknown" marker in the `leader` field of outbound envelopes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn broadcast() -> ReplicaId {
        ReplicaId(BROADCAST.to_string())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(value: &str) -> Self {
        ReplicaId(value.to_string())
    }
}

impl From<String> for ReplicaId {
    fn from(value: String) -> Self {
        ReplicaId(value)
    }
}

/// Monotonically increasing term number.
///
/// Terms act as logical clocks and are used to detect stale leaders and
/// candidates.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Term(u64);

impl Term {
    pub fn increment(self) -> Term {
        Term(self.0.saturating_add(1))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl From<u64> for Term {
    fn from(value: u64) -> Self {
        Term(value)
    }
}
