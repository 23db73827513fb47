//! A replicated key-value store driven by a Raft-family consensus protocol.
//!
//! A fixed cluster of replicas exchanges JSON envelopes over an unreliable
//! local datagram bus. Clients address `put`/`get` at any replica; writes are
//! acknowledged once a majority holds them, reads are served from the
//! leader's applied state, and everyone else answers with a redirect.
//!
//! Based on:
//! - "In Search of an Understandable Consensus Algorithm" (Ongaro & Ousterhout)

pub mod cluster;
pub mod command;
pub mod kv;
pub mod node;
pub mod runtime;
pub mod server;
pub mod state;
pub mod transport;
pub mod types;

pub use command::Command;
pub use kv::KvStore;
pub use node::{Replica, Role};
pub use runtime::{Event, Runtime, TimerConfig};
pub use server::{Config, Server};
pub use types::{Envelope, LogEntry, Message, ReplicaId, Term};
