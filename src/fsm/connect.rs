//! Active-open handshake: `CLOSED -> SYN_SENT -> ESTABLISHED`.
//!
//! Grounded on `fsm_connect.c` and on the `SynSent` branch of the
//! reference TCB state machine: send a SYN, wait for a matching SYN|ACK,
//! answer with a final ACK. A bare RST costs one of `connect_rst_retries`
//! and is retried until that budget runs out; anything else unusable
//! (timeout, corrupt datagram, a segment that doesn't carry the ACK we're
//! after) is retried unconditionally, matching `execute_syn_sent_substate`.

use log::{debug, trace, warn};

use crate::err::{ConnectError, Error};
use crate::io::{self, RawRecv};
use crate::rrb::ReceiveRingBuffer;
use crate::segment::Control;
use crate::socket::UtcpSocket;

pub(crate) fn run(sock: &mut UtcpSocket) -> Result<(), Error> {
    let timeout = sock.settings.ack_timeout;
    let mut attempts_left = sock.settings.connect_rst_retries;

    loop {
        sock.send_control(Control::SYN, 0)
            .map_err(ConnectError::Fatal)?;
        sock.stats.packets_sent += 1;
        debug!("SYN sent (seq={}), awaiting SYN|ACK", sock.seq_number);

        let outcome = io::recv_raw(sock.udp(), timeout).map_err(ConnectError::Fatal)?;
        match outcome {
            RawRecv::Segment(header, _) if header.control.is_rst() => {
                if attempts_left == 0 {
                    warn!("peer refused connection with RST, retries exhausted");
                    return Err(ConnectError::Refused.into());
                }
                attempts_left -= 1;
                warn!("peer sent RST, retrying SYN ({attempts_left} attempts left)");
                continue;
            }
            RawRecv::Segment(header, _)
                if header.control.is_syn()
                    && header.control.is_ack()
                    && header.ack_number == sock.seq_number.wrapping_add(1) =>
            {
                sock.stats.packets_received += 1;
                let peer_isn = header.seq_number;
                sock.ack_number = peer_isn.wrapping_add(1);
                sock.seq_number = sock.seq_number.wrapping_add(1);
                sock.peer_win_size = header.window;

                sock.send_control(Control::ACK, sock.ack_number)
                    .map_err(ConnectError::Fatal)?;
                sock.stats.packets_sent += 1;

                sock.rrb = Some(ReceiveRingBuffer::new(sock.settings.rrb_size, peer_isn));
                sock.cwnd = 3 * sock.settings.mss as u32;
                sock.ssthresh = sock.settings.rrb_size;
                debug!("handshake complete, established with peer {:?}", sock.peer);
                return Ok(());
            }
            RawRecv::Timeout => trace!("no response before ack_timeout, retrying SYN"),
            RawRecv::Corrupt => trace!("corrupt datagram while awaiting SYN|ACK, retrying SYN"),
            RawRecv::Segment(header, _) => {
                trace!("unexpected segment ({}) while awaiting SYN|ACK", header.control)
            }
        }
    }
}
