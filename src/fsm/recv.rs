//! Receive-side logic: folding arriving segments into the reassembly
//! buffer and handing consumable bytes back to the caller.
//!
//! Grounded on the receive half of `fsm_send.c`'s sibling (segment
//! arrival handling is shared with the passive shutdown path: a FIN seen
//! here just flips the socket into `ClosingByPeer` and acks it, it doesn't
//! run the full passive-shutdown FSM — that only happens once the
//! application calls [`crate::socket::UtcpSocket::shutdown`]).

use log::{debug, trace};

use crate::err::Error;
use crate::io::{self, RawRecv};
use crate::segment::{Control, Header};
use crate::socket::{State, UtcpSocket};

/// Flags controlling how `recv` waits for data, mirroring
/// `MSG_WAITALL`/`MSG_DONTWAIT` from the original `recv` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecvFlags(u8);

impl RecvFlags {
    pub const NONE: RecvFlags = RecvFlags(0);
    pub const WAITALL: RecvFlags = RecvFlags(1);
    pub const DONTWAIT: RecvFlags = RecvFlags(1 << 1);

    pub fn contains(self, other: RecvFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RecvFlags {
    type Output = RecvFlags;
    fn bitor(self, rhs: RecvFlags) -> RecvFlags {
        RecvFlags(self.0 | rhs.0)
    }
}

pub(crate) fn run(sock: &mut UtcpSocket, buf: &mut [u8]) -> Result<usize, Error> {
    run_with_flags(sock, buf, RecvFlags::NONE)
}

pub(crate) fn run_with_flags(
    sock: &mut UtcpSocket,
    buf: &mut [u8],
    flags: RecvFlags,
) -> Result<usize, Error> {
    let mut filled = 0usize;

    loop {
        if sock.rrb().consumable() > 0 {
            filled += sock.rrb_mut().pop(&mut buf[filled..]);
            if !flags.contains(RecvFlags::WAITALL) || filled == buf.len() {
                return Ok(filled);
            }
            continue;
        }

        if sock.state == State::ClosingByPeer {
            return Ok(filled);
        }

        let timeout = if flags.contains(RecvFlags::DONTWAIT) {
            std::time::Duration::from_micros(1)
        } else {
            sock.settings.ack_timeout
        };

        match io::recv_raw(sock.udp(), timeout).map_err(Error::Io)? {
            RawRecv::Segment(header, payload) => {
                sock.stats.packets_received += 1;
                if header.control.is_rst() {
                    sock.state = State::Reset;
                    return Err(Error::ConnectionReset);
                }
                if header.control.is_fin() {
                    if header.seq_number == sock.ack_number {
                        accept_peer_fin(sock, &header);
                        if flags.contains(RecvFlags::DONTWAIT) {
                            return Ok(filled);
                        }
                    } else {
                        trace!(
                            "ignoring out-of-order FIN (seq={}, expected {})",
                            header.seq_number, sock.ack_number
                        );
                    }
                    continue;
                }
                if !payload.is_empty() || header.control.is_win() {
                    accept_data(sock, &header, &payload);
                }
            }
            RawRecv::Timeout | RawRecv::Corrupt => {
                if flags.contains(RecvFlags::DONTWAIT) {
                    return Ok(filled);
                }
                trace!("nothing usable this round, retrying recv");
            }
        }
    }
}

fn accept_data(sock: &mut UtcpSocket, header: &Header, payload: &[u8]) {
    let accepted = sock.rrb_mut().append(header.seq_number, payload);
    if accepted != payload.len() {
        sock.stats.bytes_lost += (payload.len() - accepted) as u64;
    }
    sock.stats.bytes_received += accepted as u64;
    sock.ack_number = sock.rrb().high_water_mark().wrapping_add(1);
    sock.peer_win_size = header.window;

    let window = sock.rrb().advertised_window();
    let _ = io::send_segment(
        sock.udp(),
        sock.seq_number,
        sock.ack_number,
        Control::ACK,
        window,
        &[],
        sock.settings.mss,
    );
    sock.stats.packets_sent += 1;
}

fn accept_peer_fin(sock: &mut UtcpSocket, header: &Header) {
    sock.ack_number = header.seq_number.wrapping_add(1);
    sock.state = State::ClosingByPeer;
    let _ = sock.send_control(Control::ACK, sock.ack_number);
    sock.stats.packets_sent += 1;
    debug!("peer sent FIN, moving to ClosingByPeer");
}
