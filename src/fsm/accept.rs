//! Passive-open handshake: `LISTEN -> SYN_RCVD -> ESTABLISHED`.
//!
//! Grounded on `fsm_accept.c`: wait for a SYN, answer with SYN|ACK, retry
//! the SYN|ACK up to `accept_synack_retries` times while waiting for the
//! final ACK. Unlike the connect side, exhausting those retries doesn't
//! fail the call outright — it drops the half-open attempt and goes back
//! to waiting for a fresh SYN, the same way a real `accept()` never gives
//! up over one bad peer.

use std::net::SocketAddr;

use log::{debug, trace, warn};

use crate::err::Error;
use crate::io::{self, RawRecv};
use crate::rrb::ReceiveRingBuffer;
use crate::segment::Control;
use crate::socket::UtcpSocket;

pub(crate) fn run(sock: &mut UtcpSocket) -> Result<(), Error> {
    loop {
        let (peer, peer_isn) = match await_syn(sock)? {
            Some(pair) => pair,
            None => continue,
        };

        sock.udp().connect(peer)?;
        sock.peer = Some(peer);
        sock.ack_number = peer_isn.wrapping_add(1);
        sock.seq_number = crate::socket::generate_isn();
        debug!("SYN received from {peer}, replying with SYN|ACK");

        match complete_handshake(sock) {
            Ok(()) => return Ok(()),
            Err(HandshakeFailed) => {
                warn!("accept attempt from {peer} abandoned, returning to LISTEN");
                sock.udp = Some(std::net::UdpSocket::bind(sock.udp().local_addr()?)?);
                sock.peer = None;
            }
        }
    }
}

fn await_syn(sock: &UtcpSocket) -> Result<Option<(SocketAddr, u32)>, Error> {
    match io::recv_raw_from(sock.udp.as_ref().expect("bound before accept"), sock.settings.ack_timeout)? {
        (RawRecv::Segment(header, _), Some(addr)) if header.control.is_syn() && !header.control.is_ack() => {
            Ok(Some((addr, header.seq_number)))
        }
        _ => Ok(None),
    }
}

struct HandshakeFailed;

fn complete_handshake(sock: &mut UtcpSocket) -> Result<(), HandshakeFailed> {
    let timeout = sock.settings.ack_timeout;
    let mut attempts_left = sock.settings.accept_synack_retries;

    loop {
        sock.send_control(Control::SYN | Control::ACK, sock.ack_number)
            .map_err(|_| HandshakeFailed)?;
        sock.stats.packets_sent += 1;

        let outcome = io::recv_raw(sock.udp(), timeout).map_err(|_| HandshakeFailed)?;
        match outcome {
            RawRecv::Segment(header, _)
                if header.control.is_ack()
                    && !header.control.is_syn()
                    && header.ack_number == sock.seq_number.wrapping_add(1) =>
            {
                sock.stats.packets_received += 1;
                sock.seq_number = sock.seq_number.wrapping_add(1);
                sock.peer_win_size = header.window;

                sock.rrb = Some(ReceiveRingBuffer::new(sock.settings.rrb_size, sock.ack_number.wrapping_sub(1)));
                sock.cwnd = 3 * sock.settings.mss as u32;
                sock.ssthresh = sock.settings.rrb_size;
                debug!("handshake complete, established with peer {:?}", sock.peer);
                return Ok(());
            }
            RawRecv::Timeout => trace!("no ACK before ack_timeout, retrying SYN|ACK"),
            RawRecv::Corrupt => trace!("corrupt datagram while awaiting ACK, retrying SYN|ACK"),
            RawRecv::Segment(header, _) => {
                trace!("unexpected segment ({}) while awaiting ACK", header.control)
            }
        }

        if attempts_left == 0 {
            return Err(HandshakeFailed);
        }
        attempts_left -= 1;
    }
}
