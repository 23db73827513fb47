use serde::{Deserialize, Serialize};

use super::primitives::Term;

/// A single entry in the replicated log: one key→value binding stamped with
/// the term of the leader that created it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: String,
    pub value: String,
    pub term: Term,
}

impl LogEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, term: Term) -> LogEntry {
        LogEntry {
            key: key.into(),
            value: value.into(),
            term,
        }
    }
}
