use serde::{Deserialize, Serialize};

use super::log::LogEntry;
use super::primitives::{ReplicaId, Term};

/// Wire envelope shared by every message on the bus. The `leader` field
/// carries the sender's current belief about who leads, `"FFFF"` if unknown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub src: ReplicaId,
    pub dst: ReplicaId,
    pub leader: ReplicaId,
    #[serde(flatten)]
    pub body: Message,
}

/// Client `put` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    #[serde(rename = "MID")]
    pub mid: String,
    pub key: String,
    pub value: String,
}

/// Client `get` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(rename = "MID")]
    pub mid: String,
    pub key: String,
}

/// Positive client response. Carries a value only when answering a `get`;
/// a missing key is reported as the empty string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    #[serde(rename = "MID")]
    pub mid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Redirection to the leader named in the envelope's `leader` field. The
/// original client request rides along so a replica receiving this can
/// forward it without the client's help.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectResponse {
    #[serde(rename = "MID")]
    pub mid: String,
    #[serde(
        rename = "redirectMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub redirected: Option<Box<Envelope>>,
}

/// Negative client response. Part of the vocabulary for clients that retry;
/// the consensus core never emits it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailResponse {
    #[serde(rename = "MID")]
    pub mid: String,
}

/// Candidate's request for a vote in `term`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: ReplicaId,
    #[serde(rename = "lastLogIndex")]
    pub last_log_index: i64,
    #[serde(rename = "lastLogTerm")]
    pub last_log_term: Term,
}

/// Reply to a [`RequestVote`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub term: Term,
    #[serde(rename = "voteGranted")]
    pub granted: bool,
}

/// Log replication and heartbeat carrier. An empty `entries` list is a
/// heartbeat; `entire_log` marks a backfill whose payload starts at
/// `prev_log_index` and runs to the leader's tail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: Term,
    #[serde(rename = "prevLogIndex")]
    pub prev_log_index: i64,
    #[serde(rename = "prevLogTerm")]
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    #[serde(rename = "leaderCommit")]
    pub leader_commit: i64,
    #[serde(rename = "entireLog")]
    pub entire_log: bool,
}

/// Reply to a non-heartbeat [`AppendEntries`]. On success `match_index` is
/// the follower's new last index; on failure it is the base the leader
/// should backfill from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendReply {
    pub term: Term,
    pub success: bool,
    #[serde(rename = "matchIndex")]
    pub match_index: i64,
}

/// Every message on the bus, dispatched by the wire-level `type` tag.
/// Unknown tags fail to decode and are dropped at the transport edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "hello")]
    Hello,
    #[serde(rename = "put")]
    Put(PutRequest),
    #[serde(rename = "get")]
    Get(GetRequest),
    #[serde(rename = "ok")]
    Ok(OkResponse),
    #[serde(rename = "redirect")]
    Redirect(RedirectResponse),
    #[serde(rename = "fail")]
    Fail(FailResponse),
    #[serde(rename = "requestVote")]
    RequestVote(RequestVote),
    #[serde(rename = "vote")]
    Vote(Vote),
    #[serde(rename = "appendEntries")]
    AppendEntries(AppendEntries),
    #[serde(rename = "appendReply")]
    AppendReply(AppendReply),
}
