use std::time::{Duration, Instant};

use log::{info, warn};

use crate::command::Command;
use crate::node::Replica;
use crate::runtime::{Event, Runtime, TimerConfig};
use crate::transport::{Transport, TransportError};
use crate::types::ReplicaId;

/// Upper bound on one blocking receive, so timers keep firing through
/// prolonged silence on the bus.
const RECV_BOUND: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

pub struct Config {
    pub port: u16,
    pub id: ReplicaId,
    pub peers: Vec<ReplicaId>,
}

/// A running replica: consensus core plus timers, wired to the bus.
pub struct Server {
    runtime: Runtime,
    transport: Transport,
}

impl Server {
    /// Bind the socket, announce presence, and stand up the replica.
    pub fn start(config: Config) -> Result<Server, ServerError> {
        let transport = Transport::bind(config.port)?;
        let node = Replica::new(config.id.clone(), config.peers);
        let runtime = Runtime::new(node, TimerConfig::draw());
        let server = Server { runtime, transport };

        server.transport.send(&server.runtime.node().hello())?;
        info!("replica {} up, bus port {}", config.id, config.port);
        Ok(server)
    }

    /// Run the event loop. Returns only on an unrecoverable I/O error.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            // Drain due timers before blocking so back-to-back expirations
            // are not skipped.
            if let Some(event) = self.runtime.poll_timers() {
                let commands = self.runtime.handle(event);
                self.dispatch(commands);
                continue;
            }

            let wait = self
                .runtime
                .next_deadline()
                .saturating_duration_since(Instant::now())
                .min(RECV_BOUND);

            if let Some(envelope) = self.transport.recv_timeout(wait)? {
                let commands = self.runtime.handle(Event::Message(envelope));
                self.dispatch(commands);
            }
        }
    }

    /// Put outbound envelopes on the bus. Failed sends are logged and
    /// dropped: the bus is lossy anyway and retry loops cover the gap.
    fn dispatch(&self, commands: Vec<Command>) {
        for command in commands {
            if let Command::Send { message } = command {
                if let Err(e) = self.transport.send(&message) {
                    warn!("send to {} failed: {e}", message.dst);
                }
            }
        }
    }
}
