mod log;
mod message;
mod primitives;

pub use log::LogEntry;
pub use message::{
    AppendEntries, AppendReply, Envelope, FailResponse, GetRequest, Message, OkResponse,
    PutRequest, RedirectResponse, RequestVote, Vote,
};
pub use primitives::{ReplicaId, Term, BROADCAST};
