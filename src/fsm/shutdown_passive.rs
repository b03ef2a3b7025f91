//! Passive close: `FINACK_RECEIVED -> CLOSE_WAIT -> LAST_ACK -> CLOSED`.
//!
//! Entered when the application calls [`crate::socket::UtcpSocket::shutdown`]
//! after the receive path already observed the peer's FIN|ACK and moved the
//! socket to `ClosingByPeer` (see [`crate::fsm::recv`]); that path already
//! did the `FINACK_RECEIVED` substate's job of acking the peer's FIN, so
//! this FSM picks up at `CLOSE_WAIT`. Grounded on `fsm_shutdown_passive.c`.

use log::{debug, trace, warn};

use crate::err::{Error, ShutdownError};
use crate::io::{self, RawRecv};
use crate::segment::Control;
use crate::socket::UtcpSocket;

pub(crate) fn run(sock: &mut UtcpSocket) -> Result<(), Error> {
    // CLOSE_WAIT: nothing left to drain (send() only returns once every
    // byte is acked), so go straight to sending our own FIN|ACK.
    sock.send_control(Control::FIN | Control::ACK, sock.ack_number)
        .map_err(ShutdownError::Fatal)?;
    sock.stats.packets_sent += 1;
    debug!("sent our own FIN|ACK (seq={}), entering LAST_ACK", sock.seq_number);

    last_ack(sock)?;

    sock.rrb = None;
    sock.send_queue.flush();
    debug!("shutdown complete, connection closed");
    Ok(())
}

/// `LAST_ACK`: wait for the peer to acknowledge our FIN, retrying up to
/// `shutdown_finack_retries` times. Unlike the active side, running out of
/// retries here still closes the connection (after one final RST) rather
/// than failing the call — the peer already believes the connection is
/// over, so there's nothing the active side could still be told.
fn last_ack(sock: &mut UtcpSocket) -> Result<(), Error> {
    let required_ack = sock.seq_number.wrapping_add(1);
    let mut retries_left = sock.settings.shutdown_finack_retries;

    loop {
        let outcome = io::recv_raw(sock.udp(), sock.settings.ack_timeout).map_err(ShutdownError::Fatal)?;
        match outcome {
            RawRecv::Segment(header, _) if header.control.is_rst() => {
                warn!("received RST while awaiting final ACK");
                return Ok(());
            }
            RawRecv::Segment(header, _) if header.control.is_ack() && header.ack_number == required_ack => {
                sock.stats.packets_received += 1;
                sock.seq_number = required_ack;
                return Ok(());
            }
            RawRecv::Segment(header, _) if header.control.is_fin() => {
                // Peer retransmitted its FIN|ACK before acking ours.
                sock.send_control(Control::ACK, sock.ack_number)
                    .map_err(ShutdownError::Fatal)?;
                sock.stats.packets_sent += 1;
            }
            _ => {
                if retries_left == 0 {
                    warn!("final ACK never arrived, sending RST and closing anyway");
                    let _ = sock.send_control(Control::RST, sock.ack_number);
                    return Ok(());
                }
                retries_left -= 1;
                trace!("no final ACK yet, retrying ({retries_left} attempts left)");
                sock.send_control(Control::FIN | Control::ACK, sock.ack_number)
                    .map_err(ShutdownError::Fatal)?;
                sock.stats.packets_sent += 1;
            }
        }
    }
}
