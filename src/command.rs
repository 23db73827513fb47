use crate::types::Envelope;

/// Effects the consensus core hands back to its runtime.
pub enum Command {
    /// Put a fully addressed envelope on the bus.
    Send { message: Envelope },
    /// Re-arm the election deadline.
    ResetElectionTimer,
    /// Re-arm the heartbeat deadline (leader only).
    ResetHeartbeatTimer,
}
