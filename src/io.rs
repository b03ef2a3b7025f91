//! Datagram transport primitives shared by every FSM.
//!
//! Replaces `segment_io.c`'s split between control-segment and
//! data-segment receive helpers with one low-level [`recv_raw`] that just
//! classifies "what structurally arrived" (timeout / corrupt / a valid
//! segment), leaving interpretation of which flags were *expected* to each
//! FSM call site — the same division of labor the original has between
//! its generic recvfrom wrapper and the per-state classification logic
//! layered on top of it in the `fsm_*.c` files.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::segment::{self, Control, Header, Segment};

/// Largest UDP datagram this crate will ever send or expect to receive:
/// the practical ceiling for an IPv4 UDP payload, comfortably above any
/// configured `mss` plus header.
pub const MAX_DATAGRAM: usize = 65507;

/// Outcome of one attempt to receive a segment.
#[derive(Debug)]
pub enum RawRecv {
    /// Nothing arrived before the read timeout expired.
    Timeout,
    /// Something arrived but failed the checksum or was too short to hold
    /// a header.
    Corrupt,
    /// A structurally valid segment arrived.
    Segment(Header, Vec<u8>),
}

/// Performs exactly one `recvfrom` attempt, blocking for at most
/// `timeout`. Structural/checksum failures and genuine timeouts are both
/// reported as variants of [`RawRecv`] rather than [`std::io::Error`];
/// only a fatal OS-level error (anything but a timeout) is propagated.
pub fn recv_raw(sock: &UdpSocket, timeout: Duration) -> std::io::Result<RawRecv> {
    sock.set_read_timeout(Some(timeout))?;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    match sock.recv(&mut buf) {
        Ok(n) => {
            buf.truncate(n);
            if !segment::validate(&mut buf) {
                return Ok(RawRecv::Corrupt);
            }
            match segment::extract(&buf) {
                Ok(extracted) => {
                    let header = extracted.header;
                    let payload = extracted.payload.to_vec();
                    Ok(RawRecv::Segment(header, payload))
                }
                Err(_) => Ok(RawRecv::Corrupt),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
            Ok(RawRecv::Timeout)
        }
        Err(e) => Err(e),
    }
}

/// Like [`recv_raw`], but for a socket that hasn't called `connect` yet
/// and so doesn't have a fixed peer — used only while waiting for the
/// very first SYN in [`crate::fsm::accept`], before the peer's address is
/// known. Reports the sender's address alongside the usual classification.
pub fn recv_raw_from(
    sock: &UdpSocket,
    timeout: Duration,
) -> std::io::Result<(RawRecv, Option<SocketAddr>)> {
    sock.set_read_timeout(Some(timeout))?;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    match sock.recv_from(&mut buf) {
        Ok((n, addr)) => {
            buf.truncate(n);
            if !segment::validate(&mut buf) {
                return Ok((RawRecv::Corrupt, Some(addr)));
            }
            match segment::extract(&buf) {
                Ok(extracted) => {
                    let header = extracted.header;
                    let payload = extracted.payload.to_vec();
                    Ok((RawRecv::Segment(header, payload), Some(addr)))
                }
                Err(_) => Ok((RawRecv::Corrupt, Some(addr))),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
            Ok((RawRecv::Timeout, None))
        }
        Err(e) => Err(e),
    }
}

/// Serializes and sends a segment, returning the number of payload bytes
/// actually put on the wire (the whole payload, barring a short write —
/// UDP datagrams are sent atomically so this is really all-or-nothing).
pub fn send_segment(
    sock: &UdpSocket,
    seq_number: u32,
    ack_number: u32,
    control: Control,
    window: u16,
    payload: &[u8],
    mss: usize,
) -> std::io::Result<usize> {
    let seg = Segment::construct(seq_number, ack_number, control, window, payload, mss)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut wire = Vec::with_capacity(segment::HEADER_SIZE + payload.len());
    seg.serialize_into(&mut wire);
    sock.send(&wire)?;
    Ok(payload.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn udp_pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let a_addr: SocketAddr = a.local_addr().unwrap();
        let b_addr: SocketAddr = b.local_addr().unwrap();
        a.connect(b_addr).unwrap();
        b.connect(a_addr).unwrap();
        (a, b)
    }

    #[test]
    fn sends_and_receives_a_segment() {
        let (a, b) = udp_pair();
        send_segment(&a, 1, 0, Control::SYN, 8192, b"hi", 1400).unwrap();
        match recv_raw(&b, Duration::from_millis(200)).unwrap() {
            RawRecv::Segment(header, payload) => {
                assert_eq!(header.seq_number, 1);
                assert_eq!(header.control, Control::SYN);
                assert_eq!(payload, b"hi");
            }
            other => panic!("expected a segment, got {other:?}"),
        }
    }

    #[test]
    fn reports_timeout_when_nothing_arrives() {
        let (_a, b) = udp_pair();
        match recv_raw(&b, Duration::from_millis(20)).unwrap() {
            RawRecv::Timeout => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
