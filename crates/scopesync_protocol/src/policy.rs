//! Conflict resolution policy.

use serde::{Deserialize, Serialize};

/// Deterministic winner rule applied per conflicting row during apply.
///
/// The policy names the winner as seen by the applying peer:
/// `ServerWins` keeps the applying peer's existing row and discards
/// the incoming one, `ClientWins` lets the incoming row overwrite.
/// The orchestrator applies the configured policy on the server and
/// its opposite on the client so the same winner is retained on both
/// peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolutionPolicy {
    /// The peer applying the changes keeps its own row.
    ServerWins,
    /// The incoming row overwrites the applying peer's row.
    ClientWins,
}

impl ConflictResolutionPolicy {
    /// Returns the symmetric policy for the other side of the session.
    pub fn opposite(self) -> Self {
        match self {
            ConflictResolutionPolicy::ServerWins => ConflictResolutionPolicy::ClientWins,
            ConflictResolutionPolicy::ClientWins => ConflictResolutionPolicy::ServerWins,
        }
    }

    /// Returns true if the incoming row wins under this policy.
    pub fn incoming_wins(self) -> bool {
        matches!(self, ConflictResolutionPolicy::ClientWins)
    }
}

impl Default for ConflictResolutionPolicy {
    fn default() -> Self {
        ConflictResolutionPolicy::ServerWins
    }
}
