use std::collections::{HashSet, VecDeque};

use crate::command::Command;
use crate::node::{Replica, Role};
use crate::types::{Envelope, ReplicaId};

/// Simulated cluster for testing: an in-memory bus delivering envelopes
/// between replicas deterministically, with optional partitions. Anything
/// addressed to an id that is not a replica lands in the client inbox.
pub struct Cluster {
    nodes: Vec<Replica>,
    messages: VecDeque<Envelope>,
    client_inbox: Vec<Envelope>,
    severed: HashSet<ReplicaId>,
}

impl Cluster {
    /// Create a cluster of replicas with the given ids, fully connected.
    pub fn new(ids: &[&str]) -> Cluster {
        let all: Vec<ReplicaId> = ids.iter().map(|id| ReplicaId::from(*id)).collect();
        let nodes = all
            .iter()
            .map(|id| {
                let peers = all.iter().filter(|peer| *peer != id).cloned().collect();
                Replica::new(id.clone(), peers)
            })
            .collect();
        Cluster {
            nodes,
            messages: VecDeque::new(),
            client_inbox: Vec::new(),
            severed: HashSet::new(),
        }
    }

    pub fn node(&self, index: usize) -> &Replica {
        &self.nodes[index]
    }

    /// Fire the election timer on one replica.
    pub fn election_timeout(&mut self, index: usize) {
        let commands = self.nodes[index].election_timeout();
        self.absorb(commands);
    }

    /// Fire the heartbeat timer on one replica.
    pub fn heartbeat_timeout(&mut self, index: usize) {
        let commands = self.nodes[index].heartbeat_timeout();
        self.absorb(commands);
    }

    /// Inject a client envelope and run the cluster to quiescence.
    pub fn submit(&mut self, envelope: Envelope) {
        self.messages.push_back(envelope);
        self.deliver_all();
    }

    /// Deliver all pending messages, including any they provoke.
    pub fn deliver_all(&mut self) {
        while let Some(envelope) = self.messages.pop_front() {
            self.deliver(envelope);
        }
    }

    fn deliver(&mut self, envelope: Envelope) {
        if self.severed.contains(&envelope.src) {
            return;
        }
        if envelope.dst.is_broadcast() {
            for index in 0..self.nodes.len() {
                let id = self.nodes[index].id.clone();
                if id == envelope.src || self.severed.contains(&id) {
                    continue;
                }
                self.feed(index, envelope.clone());
            }
            return;
        }
        match self.index_of(&envelope.dst) {
            Some(index) if !self.severed.contains(&envelope.dst) => self.feed(index, envelope),
            Some(_) => {}
            None => self.client_inbox.push(envelope),
        }
    }

    fn feed(&mut self, index: usize, envelope: Envelope) {
        let commands = self.nodes[index].handle(envelope);
        self.absorb(commands);
    }

    fn absorb(&mut self, commands: Vec<Command>) {
        for command in commands {
            if let Command::Send { message } = command {
                self.messages.push_back(message);
            }
        }
    }

    fn index_of(&self, id: &ReplicaId) -> Option<usize> {
        self.nodes.iter().position(|node| &node.id == id)
    }

    /// Cut a replica off the bus in both directions.
    pub fn sever(&mut self, index: usize) {
        self.severed.insert(self.nodes[index].id.clone());
    }

    /// Reconnect a previously severed replica.
    pub fn heal(&mut self, index: usize) {
        let id = self.nodes[index].id.clone();
        self.severed.remove(&id);
    }

    /// Find the current leader, if any.
    pub fn leader(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| matches!(node.role, Role::Leader(_)))
    }

    /// Count nodes in each role: (followers, candidates, leaders).
    pub fn role_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for node in &self.nodes {
            match node.role {
                Role::Follower(_) => counts.0 += 1,
                Role::Candidate(_) => counts.1 += 1,
                Role::Leader(_) => counts.2 += 1,
            }
        }
        counts
    }

    /// Drain everything delivered to clients so far, in send order.
    pub fn take_client_messages(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.client_inbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GetRequest, Message, PutRequest, Term};

    const CLIENT: &str = "c0de";

    fn put(dst: &str, mid: &str, key: &str, value: &str) -> Envelope {
        Envelope {
            src: ReplicaId::from(CLIENT),
            dst: ReplicaId::from(dst),
            leader: ReplicaId::broadcast(),
            body: Message::Put(PutRequest {
                mid: mid.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    fn get(dst: &str, mid: &str, key: &str) -> Envelope {
        Envelope {
            src: ReplicaId::from(CLIENT),
            dst: ReplicaId::from(dst),
            leader: ReplicaId::broadcast(),
            body: Message::Get(GetRequest {
                mid: mid.to_string(),
                key: key.to_string(),
            }),
        }
    }

    fn elect(cluster: &mut Cluster, index: usize) {
        cluster.election_timeout(index);
        cluster.deliver_all();
        assert_eq!(cluster.leader(), Some(index));
    }

    fn oks(messages: &[Envelope]) -> Vec<(&str, Option<&str>)> {
        messages
            .iter()
            .filter_map(|env| match &env.body {
                Message::Ok(ok) => Some((ok.mid.as_str(), ok.value.as_deref())),
                _ => None,
            })
            .collect()
    }

    /// Shared log prefixes must agree entry-for-entry wherever index and
    /// term coincide.
    fn assert_logs_match(cluster: &Cluster) {
        for a in &cluster.nodes {
            for b in &cluster.nodes {
                let shared = a.log.len().min(b.log.len());
                for i in 0..shared {
                    if a.log[i].term == b.log[i].term {
                        assert_eq!(a.log[..=i], b.log[..=i]);
                    }
                }
            }
        }
    }

    #[test]
    fn first_election_elects_a_single_leader() {
        let mut cluster = Cluster::new(&["0000", "0001", "0002"]);

        cluster.election_timeout(0);
        assert_eq!(cluster.role_counts(), (2, 1, 0));

        cluster.deliver_all();
        assert_eq!(cluster.leader(), Some(0));
        assert_eq!(cluster.role_counts(), (2, 0, 1));
        for i in 0..3 {
            assert_eq!(cluster.node(i).current_term, Term::from(1));
        }
    }

    #[test]
    fn concurrent_candidacies_settle_on_one_leader() {
        let mut cluster = Cluster::new(&["0000", "0001", "0002"]);

        cluster.election_timeout(0);
        cluster.election_timeout(1);
        cluster.deliver_all();

        let (_, _, leaders) = cluster.role_counts();
        assert_eq!(leaders, 1);
    }

    #[test]
    fn put_commits_and_acks_then_get_reads_it_back() {
        let mut cluster = Cluster::new(&["0000", "0001", "0002"]);
        elect(&mut cluster, 0);

        cluster.submit(put("0000", "m1", "a", "1"));
        let replies = cluster.take_client_messages();
        assert_eq!(oks(&replies), vec![("m1", None)]);

        cluster.submit(get("0000", "m2", "a"));
        let replies = cluster.take_client_messages();
        assert_eq!(oks(&replies), vec![("m2", Some("1"))]);

        // The committed entry sits on a majority.
        let holders = (0..3)
            .filter(|&i| !cluster.node(i).log.is_empty())
            .count();
        assert!(holders >= 2);
    }

    #[test]
    fn follower_redirects_and_the_retry_succeeds() {
        let mut cluster = Cluster::new(&["0000", "0001", "0002"]);
        elect(&mut cluster, 0);

        cluster.submit(put("0001", "m3", "b", "2"));
        let replies = cluster.take_client_messages();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].leader, ReplicaId::from("0000"));
        let Message::Redirect(ref redirect) = replies[0].body else {
            panic!("expected redirect");
        };
        assert_eq!(redirect.mid, "m3");

        // The client retries against the named leader.
        cluster.submit(put("0000", "m3", "b", "2"));
        let replies = cluster.take_client_messages();
        assert_eq!(oks(&replies), vec![("m3", None)]);
    }

    #[test]
    fn leader_failure_elects_a_replacement() {
        let mut cluster = Cluster::new(&["0000", "0001", "0002", "0003", "0004"]);
        elect(&mut cluster, 0);

        cluster.sever(0);
        cluster.election_timeout(1);
        cluster.deliver_all();

        assert!(matches!(cluster.node(1).role, Role::Leader(_)));
        assert!(cluster.node(1).current_term >= Term::from(2));
        for i in 1..5 {
            assert_eq!(cluster.node(i).leader_hint(), ReplicaId::from("0001"));
        }

        // The replacement accepts writes.
        cluster.submit(put("0001", "m1", "a", "1"));
        assert_eq!(oks(&cluster.take_client_messages()), vec![("m1", None)]);
    }

    #[test]
    fn partitioned_follower_adopts_the_leader_log_on_heal() {
        let mut cluster = Cluster::new(&["0000", "0001", "0002"]);
        elect(&mut cluster, 0);

        cluster.sever(2);
        cluster.submit(put("0000", "m1", "a", "1"));
        cluster.submit(put("0000", "m2", "b", "2"));
        cluster.submit(put("0000", "m3", "c", "3"));
        assert_eq!(
            oks(&cluster.take_client_messages()),
            vec![("m1", None), ("m2", None), ("m3", None)]
        );
        assert!(cluster.node(2).log.is_empty());

        cluster.heal(2);
        cluster.submit(put("0000", "m4", "d", "4"));
        cluster.take_client_messages();

        assert_eq!(cluster.node(2).log, cluster.node(0).log);
        assert_eq!(cluster.node(2).kv.get("a"), Some("1"));
        assert_eq!(cluster.node(2).kv.get("c"), Some("3"));
        assert_logs_match(&cluster);
    }

    #[test]
    fn stale_leader_steps_down_when_it_rejoins() {
        let mut cluster = Cluster::new(&["0000", "0001", "0002"]);
        elect(&mut cluster, 0);

        cluster.sever(0);
        cluster.election_timeout(1);
        cluster.deliver_all();
        assert!(matches!(cluster.node(1).role, Role::Leader(_)));
        cluster.submit(put("0001", "m1", "x", "9"));

        cluster.heal(0);
        // The stale leader's own heartbeat convinces nobody.
        cluster.heartbeat_timeout(0);
        cluster.deliver_all();
        assert!(matches!(cluster.node(1).role, Role::Leader(_)));

        // The live leader's heartbeat dethrones it.
        cluster.heartbeat_timeout(1);
        cluster.deliver_all();
        assert!(matches!(cluster.node(0).role, Role::Follower(_)));
        assert_eq!(cluster.node(0).current_term, cluster.node(1).current_term);
        assert_eq!(cluster.node(0).leader_hint(), ReplicaId::from("0001"));

        // A later write brings the rejoined replica's log in line.
        cluster.submit(put("0001", "m2", "y", "8"));
        cluster.take_client_messages();
        assert_eq!(cluster.node(0).log, cluster.node(1).log);
        assert_logs_match(&cluster);
    }

    #[test]
    fn missing_key_reads_as_empty_string() {
        let mut cluster = Cluster::new(&["0000", "0001", "0002"]);
        elect(&mut cluster, 0);

        cluster.submit(get("0000", "m9", "z"));
        assert_eq!(oks(&cluster.take_client_messages()), vec![("m9", Some(""))]);
    }

    #[test]
    fn replicas_apply_identical_prefixes() {
        let mut cluster = Cluster::new(&["0000", "0001", "0002"]);
        elect(&mut cluster, 0);

        cluster.submit(put("0000", "m1", "a", "1"));
        cluster.submit(put("0000", "m2", "b", "2"));
        cluster.submit(put("0000", "m3", "a", "3"));
        // The next append carries the commit point to the followers.
        cluster.submit(put("0000", "m4", "c", "4"));
        cluster.take_client_messages();

        for i in 1..3 {
            assert_eq!(cluster.node(i).kv.get("a"), Some("3"));
            assert_eq!(cluster.node(i).kv.get("b"), Some("2"));
        }
        assert_logs_match(&cluster);
    }

    #[test]
    fn terms_are_monotone_across_leader_churn() {
        let mut cluster = Cluster::new(&["0000", "0001", "0002"]);
        let mut floor = Term::default();

        for round in 0..3 {
            let index = round % 3;
            cluster.heal(0);
            cluster.heal(1);
            cluster.heal(2);
            cluster.election_timeout(index);
            cluster.deliver_all();

            let term = cluster.node(index).current_term;
            assert!(term >= floor);
            floor = term;
        }
    }
}
