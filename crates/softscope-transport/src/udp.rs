use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};

/// Largest payload a single IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// A bound UDP socket shared by discovery, ingest and command senders.
///
/// All methods take `&self`: one datagram is sent or received per call, so
/// concurrent senders never interleave bytes. Wrap the endpoint in an `Arc`
/// to share it between the ingest thread and the consumer.
pub struct UdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpEndpoint {
    /// Bind a UDP socket on `addr`.
    ///
    /// Port 0 asks the OS for an ephemeral port; [`local_addr`](Self::local_addr)
    /// reports the one actually assigned.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|e| TransportError::Bind { addr, source: e })?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::Bind { addr, source: e })?;

        info!(%local_addr, "bound udp endpoint");

        Ok(Self { socket, local_addr })
    }

    /// The address this endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Set the bounded wait used by [`recv_from`](Self::recv_from).
    ///
    /// `None` blocks indefinitely. A zero duration is rejected by the OS, so
    /// it is clamped to one millisecond.
    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.socket.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Send one datagram to `peer`.
    pub fn send_to(&self, payload: &[u8], peer: SocketAddr) -> Result<()> {
        loop {
            match self.socket.send_to(payload, peer) {
                Ok(sent) if sent == payload.len() => {
                    trace!(%peer, len = sent, "sent datagram");
                    return Ok(());
                }
                Ok(sent) => {
                    return Err(TransportError::ShortSend {
                        peer,
                        sent,
                        len: payload.len(),
                    })
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Send { peer, source: err }),
            }
        }
    }

    /// Receive one datagram into `buf`, waiting at most the receive timeout.
    ///
    /// Returns `Ok(None)` when nothing arrived in time or the OS reported a
    /// reset from a previous send (ICMP port unreachable surfaces this way on
    /// some platforms). Both mean "no data this tick".
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        loop {
            match self.socket.recv_from(buf) {
                Ok((len, from)) => {
                    trace!(%from, len, "received datagram");
                    return Ok(Some((len, from)));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_idle(err.kind()) => {
                    if !matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) {
                        debug!(error = %err, "ignoring reset on udp endpoint");
                    }
                    return Ok(None);
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl std::fmt::Debug for UdpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpEndpoint")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

fn is_idle(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_bind_send_recv() {
        let a = UdpEndpoint::bind(loopback()).unwrap();
        let b = UdpEndpoint::bind(loopback()).unwrap();
        b.set_recv_timeout(Some(Duration::from_secs(2))).unwrap();

        a.send_to(b"hello", b.local_addr()).unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = b.recv_from(&mut buf).unwrap().expect("datagram should arrive");
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, a.local_addr());
    }

    #[test]
    fn test_recv_timeout_is_not_an_error() {
        let ep = UdpEndpoint::bind(loopback()).unwrap();
        ep.set_recv_timeout(Some(Duration::from_millis(20))).unwrap();

        let start = Instant::now();
        let mut buf = [0u8; 16];
        let got = ep.recv_from(&mut buf).unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_zero_timeout_still_returns_promptly() {
        let ep = UdpEndpoint::bind(loopback()).unwrap();
        ep.set_recv_timeout(Some(Duration::ZERO)).unwrap();

        // The OS may round the clamped wait up to its tick; it must not block.
        let start = Instant::now();
        let mut buf = [0u8; 16];
        assert!(ep.recv_from(&mut buf).unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_bind_conflict_reports_address() {
        let first = UdpEndpoint::bind(loopback()).unwrap();
        let taken = first.local_addr();

        let result = UdpEndpoint::bind(taken);
        match result {
            Err(TransportError::Bind { addr, .. }) => assert_eq!(addr, taken),
            other => panic!("expected bind error, got {other:?}"),
        }
    }
}
