use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use log::warn;

use crate::types::Envelope;

/// Largest datagram the bus accepts.
pub const MAX_DATAGRAM: usize = 65_535;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("datagram of {0} bytes exceeds the {MAX_DATAGRAM}-byte limit")]
    Oversized(usize),
}

/// Datagram transport to the shared message bus.
///
/// Every replica owns one UDP socket bound to an ephemeral local port; all
/// outbound envelopes are JSON datagrams sent to the bus's well-known port,
/// which fans them out to their destinations. Delivery is best-effort and
/// unordered; the protocol's retry loops absorb losses. Datagrams that fail
/// to decode are logged and dropped without touching replica state.
pub struct Transport {
    socket: UdpSocket,
    bus: SocketAddr,
}

impl Transport {
    /// Bind an ephemeral local socket talking to the bus on `port`.
    pub fn bind(port: u16) -> Result<Transport, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        Ok(Transport {
            socket,
            bus: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        })
    }

    /// Serialize and send one envelope to the bus.
    pub fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(envelope)?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(TransportError::Oversized(bytes.len()));
        }
        self.socket.send_to(&bytes, self.bus)?;
        Ok(())
    }

    /// Wait up to `timeout` for one envelope. Returns `None` on timeout and
    /// on malformed datagrams.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>, TransportError> {
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _)) => match serde_json::from_slice(&buf[..len]) {
                Ok(envelope) => Ok(Some(envelope)),
                Err(e) => {
                    warn!("dropping malformed datagram: {e}");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The address this transport receives on.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, ReplicaId};

    fn hello(src: &str) -> Envelope {
        Envelope {
            src: ReplicaId::from(src),
            dst: ReplicaId::broadcast(),
            leader: ReplicaId::broadcast(),
            body: Message::Hello,
        }
    }

    #[test]
    fn envelopes_reach_the_bus_as_json() {
        let bus = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let transport = Transport::bind(bus.local_addr().unwrap().port()).unwrap();

        transport.send(&hello("0001")).unwrap();

        let mut buf = [0u8; MAX_DATAGRAM];
        bus.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let (len, _) = bus.recv_from(&mut buf).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["src"], "0001");
        assert_eq!(json["dst"], "FFFF");
    }

    #[test]
    fn recv_timeout_returns_none_on_silence() {
        let transport = Transport::bind(9).unwrap();
        let received = transport
            .recv_timeout(Duration::from_millis(20))
            .unwrap();
        assert!(received.is_none());
    }

    #[test]
    fn inbound_datagrams_decode_to_envelopes() {
        let bus = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let transport = Transport::bind(bus.local_addr().unwrap().port()).unwrap();

        let envelope = hello("0002");
        let bytes = serde_json::to_vec(&envelope).unwrap();
        bus.send_to(&bytes, transport.local_addr().unwrap()).unwrap();

        let received = transport
            .recv_timeout(Duration::from_secs(2))
            .unwrap()
            .expect("expected an envelope");
        assert_eq!(received, envelope);
    }

    #[test]
    fn malformed_datagrams_are_dropped() {
        let bus = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let transport = Transport::bind(bus.local_addr().unwrap().port()).unwrap();

        bus.send_to(b"not json", transport.local_addr().unwrap())
            .unwrap();

        let received = transport.recv_timeout(Duration::from_millis(200)).unwrap();
        assert!(received.is_none());
    }
}
