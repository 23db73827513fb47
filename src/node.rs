use std::collections::HashSet;

use log::{debug, info};

use crate::command::Command;
use crate::kv::KvStore;
use crate::state::{Candidate, Follower, Leader, PendingWrite};
use crate::types::{
    AppendEntries, AppendReply, Envelope, LogEntry, Message, OkResponse, PutRequest,
    RedirectResponse, ReplicaId, RequestVote, Term, Vote,
};

/// Replica role with role-private state.
pub enum Role {
    Follower(Follower),
    Candidate(Candidate),
    Leader(Leader),
}

/// One replica of the key-value store.
///
/// The replica is pure consensus logic: it reacts to envelopes and timer
/// expirations and returns the effects (sends, timer re-arms) for its runtime
/// to carry out. The log is 0-indexed; `commit_index` and `last_applied`
/// start at -1, meaning "nothing".
pub struct Replica {
    pub id: ReplicaId,
    pub peers: Vec<ReplicaId>,
    pub current_term: Term,
    pub voted_for: Option<ReplicaId>,
    pub log: Vec<LogEntry>,
    pub commit_index: i64,
    pub last_applied: i64,
    pub kv: KvStore,
    pub role: Role,
    /// An election is in flight: a vote request or reply was seen and no
    /// leader has emerged yet.
    in_election: bool,
    elections_seen: u64,
    /// Client requests parked while an election is unresolved.
    backlog: Vec<Envelope>,
}

impl Replica {
    /// Create a new replica. Starts as follower at term 0 with no known
    /// leader; the first election produces the first leader.
    pub fn new(id: ReplicaId, peers: Vec<ReplicaId>) -> Replica {
        Replica {
            id,
            peers,
            current_term: Term::default(),
            voted_for: None,
            log: Vec::new(),
            commit_index: -1,
            last_applied: -1,
            kv: KvStore::new(),
            role: Role::Follower(Follower { leader: None }),
            in_election: false,
            elections_seen: 0,
            backlog: Vec::new(),
        }
    }

    fn last_log_index(&self) -> i64 {
        self.log.len() as i64 - 1
    }

    fn last_log_term(&self) -> Term {
        self.log.last().map_or(Term::default(), |entry| entry.term)
    }

    /// Majority of the cluster, self included.
    fn quorum(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    /// Who this replica believes leads, `FFFF` when unknown.
    pub fn leader_hint(&self) -> ReplicaId {
        match &self.role {
            Role::Leader(_) => self.id.clone(),
            Role::Follower(follower) => follower
                .leader
                .clone()
                .unwrap_or_else(ReplicaId::broadcast),
            Role::Candidate(_) => ReplicaId::broadcast(),
        }
    }

    fn send(&self, dst: ReplicaId, body: Message) -> Command {
        Command::Send {
            message: Envelope {
                src: self.id.clone(),
                dst,
                leader: self.leader_hint(),
                body,
            },
        }
    }

    /// The presence announcement emitted once at startup.
    pub fn hello(&self) -> Envelope {
        Envelope {
            src: self.id.clone(),
            dst: ReplicaId::broadcast(),
            leader: self.leader_hint(),
            body: Message::Hello,
        }
    }

    /// Entry point for every envelope off the bus. Messages addressed to
    /// someone else are dropped silently.
    pub fn handle(&mut self, envelope: Envelope) -> Vec<Command> {
        if envelope.src == self.id {
            return Vec::new();
        }
        if envelope.dst != self.id && !envelope.dst.is_broadcast() {
            return Vec::new();
        }
        self.route(envelope)
    }

    fn route(&mut self, envelope: Envelope) -> Vec<Command> {
        match envelope.body {
            Message::Hello => Vec::new(),
            Message::Put(_) | Message::Get(_) => self.handle_client(envelope),
            Message::Redirect(response) => self.handle_redirect(response),
            Message::Ok(_) | Message::Fail(_) => Vec::new(),
            Message::RequestVote(request) => self.handle_request_vote(envelope.src, request),
            Message::Vote(vote) => self.handle_vote(envelope.src, vote),
            Message::AppendEntries(request) => self.handle_append_entries(envelope.src, request),
            Message::AppendReply(reply) => self.handle_append_reply(envelope.src, reply),
        }
    }

    // ---- timers ----

    /// Election timer fired: follower or candidate starts a new candidacy.
    pub fn election_timeout(&mut self) -> Vec<Command> {
        match self.role {
            Role::Leader(_) => vec![Command::ResetElectionTimer],
            Role::Follower(_) | Role::Candidate(_) => self.start_election(),
        }
    }

    /// Heartbeat timer fired: a leader broadcasts an empty append.
    pub fn heartbeat_timeout(&mut self) -> Vec<Command> {
        if !matches!(self.role, Role::Leader(_)) {
            return Vec::new();
        }
        vec![
            self.send(
                ReplicaId::broadcast(),
                Message::AppendEntries(self.heartbeat()),
            ),
            Command::ResetHeartbeatTimer,
            Command::ResetElectionTimer,
        ]
    }

    // ---- elections ----

    fn start_election(&mut self) -> Vec<Command> {
        self.current_term = self.current_term.increment();
        self.voted_for = Some(self.id.clone());
        let mut votes = HashSet::new();
        votes.insert(self.id.clone());
        self.role = Role::Candidate(Candidate { votes });
        self.note_election();
        info!("{}: starting election for {}", self.id, self.current_term);

        let request = RequestVote {
            term: self.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        };
        let mut commands = vec![
            self.send(ReplicaId::broadcast(), Message::RequestVote(request)),
            Command::ResetElectionTimer,
            Command::ResetHeartbeatTimer,
        ];
        // A cluster of one elects itself on the spot.
        if self.quorum() == 1 {
            commands.extend(self.ascend());
        }
        commands
    }

    fn handle_request_vote(&mut self, src: ReplicaId, request: RequestVote) -> Vec<Command> {
        self.note_election();
        if request.term > self.current_term {
            self.adopt_term(request.term);
        }
        let grant = request.term == self.current_term
            && (self.voted_for.is_none() || self.voted_for.as_ref() == Some(&request.candidate_id))
            && self.log_up_to_date(request.last_log_index, request.last_log_term);
        if !grant {
            debug!(
                "{}: denying vote to {} in {}",
                self.id, request.candidate_id, self.current_term
            );
            return vec![self.send(
                src,
                Message::Vote(Vote {
                    term: self.current_term,
                    granted: false,
                }),
            )];
        }
        info!(
            "{}: voting for {} in {}",
            self.id, request.candidate_id, self.current_term
        );
        self.voted_for = Some(request.candidate_id.clone());
        // Provisionally treat the candidate as leader for redirects.
        self.role = Role::Follower(Follower {
            leader: Some(request.candidate_id),
        });
        vec![
            self.send(
                src,
                Message::Vote(Vote {
                    term: self.current_term,
                    granted: true,
                }),
            ),
            Command::ResetElectionTimer,
        ]
    }

    /// A candidate's log is electable if it is at least as up-to-date as ours.
    fn log_up_to_date(&self, last_index: i64, last_term: Term) -> bool {
        match self.log.last() {
            None => true,
            Some(entry) => {
                entry.term < last_term
                    || (entry.term == last_term && self.last_log_index() <= last_index)
            }
        }
    }

    fn handle_vote(&mut self, src: ReplicaId, vote: Vote) -> Vec<Command> {
        self.note_election();
        if vote.term > self.current_term {
            self.adopt_term(vote.term);
            return Vec::new();
        }
        let quorum = self.quorum();
        let won = match &mut self.role {
            // Replies to a past candidacy or while not campaigning are dropped.
            Role::Candidate(candidate) if vote.granted && vote.term == self.current_term => {
                candidate.votes.insert(src);
                candidate.votes.len() >= quorum
            }
            _ => false,
        };
        if won {
            self.ascend()
        } else {
            Vec::new()
        }
    }

    fn ascend(&mut self) -> Vec<Command> {
        info!("{}: won election, leading {}", self.id, self.current_term);
        self.role = Role::Leader(Leader::new(&self.peers, self.log.len()));
        self.in_election = false;
        let mut commands = vec![
            self.send(
                ReplicaId::broadcast(),
                Message::AppendEntries(self.heartbeat()),
            ),
            Command::ResetHeartbeatTimer,
            Command::ResetElectionTimer,
        ];
        commands.extend(self.drain_backlog());
        commands
    }

    /// A higher term was observed: adopt it and fall back to follower.
    fn adopt_term(&mut self, term: Term) {
        debug!("{}: adopting {} (was {})", self.id, term, self.current_term);
        self.current_term = term;
        self.voted_for = None;
        self.role = Role::Follower(Follower { leader: None });
    }

    /// A live leader made itself known, by heartbeat or append.
    fn accept_leader(&mut self, leader: ReplicaId) -> Vec<Command> {
        match &self.role {
            Role::Follower(follower) if follower.leader.as_ref() == Some(&leader) => {}
            _ => info!(
                "{}: following {} in {}",
                self.id, leader, self.current_term
            ),
        }
        self.role = Role::Follower(Follower {
            leader: Some(leader),
        });
        self.in_election = false;
        self.drain_backlog()
    }

    fn note_election(&mut self) {
        if !self.in_election {
            self.in_election = true;
            self.elections_seen += 1;
        }
    }

    /// Re-dispatch client requests parked during the election window.
    fn drain_backlog(&mut self) -> Vec<Command> {
        if self.backlog.is_empty() {
            return Vec::new();
        }
        let backlog = std::mem::take(&mut self.backlog);
        debug!(
            "{}: replaying {} buffered client messages",
            self.id,
            backlog.len()
        );
        let mut commands = Vec::new();
        for envelope in backlog {
            commands.extend(self.route(envelope));
        }
        commands
    }

    // ---- replication, leader side ----

    /// Empty append announcing leadership and the current commit point.
    fn heartbeat(&self) -> AppendEntries {
        AppendEntries {
            term: self.current_term,
            prev_log_index: self.last_log_index(),
            prev_log_term: self.log.last().map_or(Term::from(1), |entry| entry.term),
            entries: Vec::new(),
            leader_commit: self.commit_index,
            entire_log: false,
        }
    }

    /// The normal-path append: the final one or two entries of the log, the
    /// first of which sits at `prev_log_index` itself.
    fn tail_append(&self) -> AppendEntries {
        let base = (self.log.len() as i64 - 2).max(0);
        AppendEntries {
            term: self.current_term,
            prev_log_index: base,
            prev_log_term: self.log[base as usize].term,
            entries: self.log[base as usize..].to_vec(),
            leader_commit: self.commit_index,
            entire_log: false,
        }
    }

    fn handle_append_reply(&mut self, src: ReplicaId, reply: AppendReply) -> Vec<Command> {
        if reply.term > self.current_term {
            self.adopt_term(reply.term);
            return Vec::new();
        }
        // Replies from older terms or arriving at a non-leader are dropped.
        if reply.term < self.current_term || !matches!(self.role, Role::Leader(_)) {
            return Vec::new();
        }
        if reply.success {
            if let Role::Leader(leader) = &mut self.role {
                leader.match_index.insert(src.clone(), reply.match_index);
                leader.next_index.insert(src, reply.match_index + 1);
            }
            self.advance_commit()
        } else {
            self.backfill(src, reply.match_index)
        }
    }

    /// Resend the log suffix from the follower's reported base.
    fn backfill(&self, peer: ReplicaId, match_index: i64) -> Vec<Command> {
        if self.log.is_empty() {
            return Vec::new();
        }
        let base = match_index.max(0).min(self.last_log_index());
        debug!("{}: backfilling {} from index {}", self.id, peer, base);
        let request = AppendEntries {
            term: self.current_term,
            prev_log_index: base,
            prev_log_term: self.log[base as usize].term,
            entries: self.log[base as usize..].to_vec(),
            leader_commit: self.commit_index,
            entire_log: true,
        };
        vec![self.send(peer, Message::AppendEntries(request))]
    }

    /// Move `commit_index` to the highest current-term index replicated on a
    /// majority, then apply and acknowledge.
    fn advance_commit(&mut self) -> Vec<Command> {
        let quorum = self.quorum();
        let Role::Leader(leader) = &self.role else {
            return Vec::new();
        };
        let mut committed = self.commit_index;
        for index in (self.commit_index + 1)..=self.last_log_index() {
            if self.log[index as usize].term != self.current_term {
                continue;
            }
            let replicated = 1 + leader.match_index.values().filter(|&&m| m >= index).count();
            if replicated >= quorum {
                committed = index;
            }
        }
        if committed == self.commit_index {
            return Vec::new();
        }
        self.commit_index = committed;
        self.apply_committed()
    }

    /// Apply everything in `(last_applied, commit_index]` to the kv map and
    /// acknowledge the pending writes those indices carried.
    fn apply_committed(&mut self) -> Vec<Command> {
        let high = self.commit_index.min(self.last_log_index());
        while self.last_applied < high {
            let next = (self.last_applied + 1) as usize;
            let entry = self.log[next].clone();
            debug!(
                "{}: applying {}={} at index {}",
                self.id, entry.key, entry.value, next
            );
            self.kv.apply(&entry);
            self.last_applied += 1;
        }
        let applied = self.last_applied;
        let mut acked = Vec::new();
        if let Role::Leader(leader) = &mut self.role {
            let pending = std::mem::take(&mut leader.pending_writes);
            let (done, waiting): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|write| write.index <= applied);
            leader.pending_writes = waiting;
            acked = done;
        }
        acked
            .into_iter()
            .map(|write| {
                self.send(
                    write.client,
                    Message::Ok(OkResponse {
                        mid: write.mid,
                        value: None,
                    }),
                )
            })
            .collect()
    }

    // ---- replication, follower side ----

    fn handle_append_entries(&mut self, src: ReplicaId, request: AppendEntries) -> Vec<Command> {
        if request.term > self.current_term {
            self.adopt_term(request.term);
        }
        // At most one leader per term, so an equal-term append at a leader
        // can only be a stray duplicate.
        if matches!(self.role, Role::Leader(_)) && request.term == self.current_term {
            return Vec::new();
        }
        if request.entries.is_empty() {
            // Heartbeat path: adopt the live leader, never reply.
            if request.term < self.current_term {
                return Vec::new();
            }
            let mut commands = self.accept_leader(src);
            commands.push(Command::ResetElectionTimer);
            return commands;
        }
        if request.term < self.current_term {
            // A stale leader pushing entries learns its term from the reply.
            return vec![self.send(
                src,
                Message::AppendReply(AppendReply {
                    term: self.current_term,
                    success: false,
                    match_index: self.last_log_index(),
                }),
            )];
        }
        let mut commands = self.accept_leader(src.clone());
        let (success, match_index) = self.reconcile(&request);
        if success && request.leader_commit > self.commit_index {
            self.commit_index = request.leader_commit.min(self.last_log_index());
            commands.extend(self.apply_committed());
        }
        commands.push(self.send(
            src,
            Message::AppendReply(AppendReply {
                term: self.current_term,
                success,
                match_index,
            }),
        ));
        commands.push(Command::ResetElectionTimer);
        commands
    }

    /// Splice the payload into the log if the entry at `prev_log_index`
    /// matches; otherwise report a base for the leader to backfill from.
    fn reconcile(&mut self, request: &AppendEntries) -> (bool, i64) {
        let prev = request.prev_log_index;
        if self.log.is_empty() {
            if request.entire_log {
                self.log = request.entries.clone();
                return (true, self.last_log_index());
            }
            return (false, self.last_log_index());
        }
        if prev < 0 || self.last_log_index() < prev {
            return (false, self.last_log_index());
        }
        if self.log[prev as usize].term == request.prev_log_term {
            self.log.truncate(prev as usize);
            self.log.extend(request.entries.iter().cloned());
            return (true, self.last_log_index());
        }
        if request.entire_log {
            if prev == 0 {
                // The payload is the leader's whole log; adopt it wholesale.
                self.log = request.entries.clone();
                return (true, self.last_log_index());
            }
            // Diverged before the payload base: ask for one entry earlier.
            return (false, prev - 1);
        }
        (false, self.last_log_index())
    }

    // ---- client dispatch ----

    fn handle_client(&mut self, envelope: Envelope) -> Vec<Command> {
        // Requests that found us leaderless mid-election wait for the
        // outcome rather than bouncing between replicas.
        if self.in_election
            && self.elections_seen > 1
            && envelope.leader.is_broadcast()
            && !matches!(self.role, Role::Leader(_))
        {
            debug!("{}: buffering client message during election", self.id);
            self.backlog.push(envelope);
            return Vec::new();
        }
        if !matches!(self.role, Role::Leader(_)) {
            return self.redirect(envelope);
        }
        let client = envelope.src;
        match envelope.body {
            Message::Put(request) => self.leader_put(client, request),
            Message::Get(request) => {
                let value = self.kv.get(&request.key).unwrap_or_default().to_string();
                vec![self.send(
                    client,
                    Message::Ok(OkResponse {
                        mid: request.mid,
                        value: Some(value),
                    }),
                )]
            }
            _ => Vec::new(),
        }
    }

    fn leader_put(&mut self, client: ReplicaId, request: PutRequest) -> Vec<Command> {
        self.log.push(LogEntry::new(
            request.key,
            request.value,
            self.current_term,
        ));
        let index = self.last_log_index();
        if let Role::Leader(leader) = &mut self.role {
            leader.pending_writes.push(PendingWrite {
                index,
                client,
                mid: request.mid,
            });
        }
        let mut commands = vec![self.send(
            ReplicaId::broadcast(),
            Message::AppendEntries(self.tail_append()),
        )];
        // A cluster of one has its majority already.
        commands.extend(self.advance_commit());
        commands
    }

    fn redirect(&self, envelope: Envelope) -> Vec<Command> {
        let mid = match &envelope.body {
            Message::Put(request) => request.mid.clone(),
            Message::Get(request) => request.mid.clone(),
            _ => return Vec::new(),
        };
        let client = envelope.src.clone();
        vec![self.send(
            client,
            Message::Redirect(RedirectResponse {
                mid,
                redirected: Some(Box::new(envelope)),
            }),
        )]
    }

    fn handle_redirect(&mut self, response: RedirectResponse) -> Vec<Command> {
        match response.redirected {
            // The embedded request keeps its original src, so replies reach
            // the client directly.
            Some(inner) => self.route(*inner),
            None => Vec::new(),
        }
    }
}
