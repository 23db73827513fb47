use std::time::{Duration, Instant};

use rand::Rng;

use crate::command::Command;
use crate::node::{Replica, Role};
use crate::types::Envelope;

/// Events that drive the replica.
pub enum Event {
    ElectionTimeout,
    HeartbeatTimeout,
    Message(Envelope),
}

/// Timer configuration.
pub struct TimerConfig {
    pub election_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl TimerConfig {
    /// Draw this replica's election timeout once, uniformly from
    /// [500 ms, 750 ms], so replicas time out at different moments and
    /// repeated split votes stay unlikely. Heartbeats go out every 485 ms,
    /// comfortably inside the shortest election timeout.
    pub fn draw() -> TimerConfig {
        TimerConfig {
            election_timeout: Duration::from_millis(rand::rng().random_range(500..=750)),
            heartbeat_interval: Duration::from_millis(485),
        }
    }
}

/// Wraps a replica with monotonic-clock deadline management. Re-arming a
/// timer assigns a new absolute deadline; nothing recomputes intervals.
pub struct Runtime {
    node: Replica,
    config: TimerConfig,
    election_deadline: Instant,
    heartbeat_deadline: Instant,
}

impl Runtime {
    pub fn new(node: Replica, config: TimerConfig) -> Runtime {
        let now = Instant::now();
        Runtime {
            node,
            election_deadline: now + config.election_timeout,
            heartbeat_deadline: now + config.heartbeat_interval,
            config,
        }
    }

    pub fn node(&self) -> &Replica {
        &self.node
    }

    /// Process one event and return the outbound commands. Timer re-arms are
    /// consumed here; `Send`s are the caller's to dispatch.
    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        let commands = match event {
            Event::ElectionTimeout => self.node.election_timeout(),
            Event::HeartbeatTimeout => self.node.heartbeat_timeout(),
            Event::Message(envelope) => self.node.handle(envelope),
        };
        self.process(&commands);
        commands
    }

    fn process(&mut self, commands: &[Command]) {
        for command in commands {
            match command {
                Command::ResetElectionTimer => {
                    self.election_deadline = Instant::now() + self.config.election_timeout;
                }
                Command::ResetHeartbeatTimer => {
                    self.heartbeat_deadline = Instant::now() + self.config.heartbeat_interval;
                }
                Command::Send { .. } => {}
            }
        }
    }

    /// Report a due timer, elections first. Heartbeats only matter while
    /// leading.
    pub fn poll_timers(&self) -> Option<Event> {
        let now = Instant::now();
        if now >= self.election_deadline {
            return Some(Event::ElectionTimeout);
        }
        if matches!(self.node.role, Role::Leader(_)) && now >= self.heartbeat_deadline {
            return Some(Event::HeartbeatTimeout);
        }
        None
    }

    /// The next instant at which a timer fires.
    pub fn next_deadline(&self) -> Instant {
        if matches!(self.node.role, Role::Leader(_)) {
            self.election_deadline.min(self.heartbeat_deadline)
        } else {
            self.election_deadline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReplicaId;

    fn runtime(id: &str, peers: &[&str]) -> Runtime {
        let node = Replica::new(
            ReplicaId::from(id),
            peers.iter().map(|p| ReplicaId::from(*p)).collect(),
        );
        Runtime::new(
            node,
            TimerConfig {
                election_timeout: Duration::from_millis(500),
                heartbeat_interval: Duration::from_millis(485),
            },
        )
    }

    #[test]
    fn election_timeout_starts_election_and_rearms() {
        let mut rt = runtime("0000", &["0001", "0002"]);
        let before = rt.election_deadline;

        std::thread::sleep(Duration::from_millis(5));
        let commands = rt.handle(Event::ElectionTimeout);

        assert!(matches!(rt.node().role, Role::Candidate(_)));
        assert!(!commands.is_empty());
        assert!(rt.election_deadline > before);
    }

    #[test]
    fn heartbeat_timer_only_polls_for_leaders() {
        let mut rt = runtime("0000", &[]);
        rt.heartbeat_deadline = Instant::now() - Duration::from_millis(1);

        // A follower past its heartbeat deadline has nothing to send.
        assert!(rt.poll_timers().is_none());

        rt.handle(Event::ElectionTimeout);
        assert!(matches!(rt.node().role, Role::Leader(_)));

        rt.heartbeat_deadline = Instant::now() - Duration::from_millis(1);
        assert!(matches!(rt.poll_timers(), Some(Event::HeartbeatTimeout)));
    }

    #[test]
    fn drawn_timeouts_stay_in_range() {
        for _ in 0..32 {
            let config = TimerConfig::draw();
            assert!(config.election_timeout >= Duration::from_millis(500));
            assert!(config.election_timeout <= Duration::from_millis(750));
            assert_eq!(config.heartbeat_interval, Duration::from_millis(485));
        }
    }

    #[test]
    fn next_deadline_tracks_role() {
        let mut rt = runtime("0000", &[]);
        assert_eq!(rt.next_deadline(), rt.election_deadline);

        rt.handle(Event::ElectionTimeout);
        assert_eq!(
            rt.next_deadline(),
            rt.election_deadline.min(rt.heartbeat_deadline)
        );
    }
}
