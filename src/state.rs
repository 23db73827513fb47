use std::collections::{HashMap, HashSet};

use crate::types::ReplicaId;

/// Follower state - passive, responds to RPCs.
pub struct Follower {
    pub leader: Option<ReplicaId>,
}

/// Candidate state - actively seeking votes.
pub struct Candidate {
    pub votes: HashSet<ReplicaId>,
}

/// Leader state - manages replication and unacknowledged client writes.
pub struct Leader {
    /// Next log index to send to each peer.
    pub next_index: HashMap<ReplicaId, i64>,
    /// Highest index known replicated on each peer, -1 when nothing is.
    pub match_index: HashMap<ReplicaId, i64>,
    /// Client puts awaiting commit, in log order.
    pub pending_writes: Vec<PendingWrite>,
}

/// A client put accepted into the log but not yet acknowledged.
pub struct PendingWrite {
    pub index: i64,
    pub client: ReplicaId,
    pub mid: String,
}

impl Leader {
    pub fn new(peers: &[ReplicaId], log_len: usize) -> Leader {
        Leader {
            next_index: peers.iter().map(|p| (p.clone(), log_len as i64)).collect(),
            match_index: peers.iter().map(|p| (p.clone(), -1)).collect(),
            pending_writes: Vec::new(),
        }
    }
}
