//! Active close: `ESTABLISHED -> FIN_WAIT_1 -> ... -> CLOSED`.
//!
//! Grounded on `fsm_shutdown_active.c`'s substate graph: send our FIN|ACK,
//! wait for its ACK, then drain the peer's own FIN|ACK in the ordinary
//! FIN_WAIT_2 path, or fold a simultaneous close into FIN_DOUBLE when the
//! peer's FIN|ACK arrives before our ACK does. TIME_WAIT absorbs one more
//! round of a retransmitted peer FIN|ACK before the connection is finally
//! torn down.

use std::time::Instant;

use log::{debug, trace, warn};

use crate::err::{Error, ShutdownError};
use crate::io::{self, RawRecv};
use crate::segment::Control;
use crate::socket::{State, UtcpSocket};

enum Substate {
    FinWait1,
    FinDouble { peer_fin_seq: u32 },
    FinWait2Recv { deadline: Instant },
    FinWait2Send,
    TimeWait { deadline: Instant },
    Closed1,
}

pub(crate) fn run(sock: &mut UtcpSocket) -> Result<(), Error> {
    sock.state = State::ClosingByHost;
    let result = run_inner(sock);
    if result.is_err() {
        // Shutdown failed outright: the connection is still usable.
        sock.state = State::Established;
    }
    result
}

fn run_inner(sock: &mut UtcpSocket) -> Result<(), Error> {
    let mut retries_left = sock.settings.shutdown_finack_retries;

    sock.send_control(Control::FIN | Control::ACK, sock.ack_number)
        .map_err(ShutdownError::Fatal)?;
    sock.stats.packets_sent += 1;
    debug!("FIN|ACK sent (seq={}), awaiting peer's ACK", sock.seq_number);

    let mut state = Substate::FinWait1;
    loop {
        state = match state {
            Substate::FinWait1 => fin_wait_1(sock, &mut retries_left)?,
            Substate::FinDouble { peer_fin_seq } => fin_double(sock, &mut retries_left, peer_fin_seq)?,
            Substate::FinWait2Recv { deadline } => fin_wait_2_recv(sock, deadline)?,
            Substate::FinWait2Send => fin_wait_2_send(sock)?,
            Substate::TimeWait { deadline } => time_wait(sock, deadline)?,
            Substate::Closed1 => {
                sock.rrb = None;
                sock.send_queue.flush();
                debug!("shutdown complete, connection closed");
                return Ok(());
            }
        };
    }
}

fn fin_wait_1(sock: &mut UtcpSocket, retries_left: &mut u32) -> Result<Substate, Error> {
    let required_ack = sock.seq_number.wrapping_add(1);
    let outcome = io::recv_raw(sock.udp(), sock.settings.ack_timeout).map_err(ShutdownError::Fatal)?;
    match outcome {
        RawRecv::Segment(header, _) if header.control.is_fin() => {
            trace!("peer's FIN arrived before our ACK: simultaneous close");
            return Ok(Substate::FinDouble { peer_fin_seq: header.seq_number });
        }
        RawRecv::Segment(_, payload) if !payload.is_empty() => {
            // Peer is still draining data; our FIN doesn't apply yet.
            return Ok(Substate::FinWait1);
        }
        RawRecv::Segment(header, _) if header.control.is_rst() => {
            warn!("received RST while awaiting ACK of our FIN");
            return Ok(Substate::Closed1);
        }
        RawRecv::Segment(header, _) if header.control.is_ack() && header.ack_number == required_ack => {
            sock.stats.packets_received += 1;
            sock.seq_number = required_ack;
            let deadline = Instant::now() + sock.settings.shutdown_time_wait;
            return Ok(Substate::FinWait2Recv { deadline });
        }
        _ => {}
    }

    if *retries_left == 0 {
        warn!("FIN|ACK retries exhausted waiting for peer's ACK");
        return Err(ShutdownError::FinAckRetriesExhausted.into());
    }
    *retries_left -= 1;
    trace!("no ACK of our FIN yet, retrying ({} attempts left)", retries_left);
    sock.send_control(Control::FIN | Control::ACK, sock.ack_number)
        .map_err(ShutdownError::Fatal)?;
    sock.stats.packets_sent += 1;
    Ok(Substate::FinWait1)
}

/// Both sides called shutdown at roughly the same time: acknowledge the
/// peer's FIN, then keep waiting for the peer to acknowledge ours, exactly
/// as `execute_fin_double_substate` sequences it (record peer FIN, send
/// ACK, *then* continue awaiting our own FIN's ACK).
fn fin_double(sock: &mut UtcpSocket, retries_left: &mut u32, peer_fin_seq: u32) -> Result<Substate, Error> {
    sock.ack_number = peer_fin_seq.wrapping_add(1);
    sock.send_control(Control::ACK, sock.ack_number)
        .map_err(ShutdownError::Fatal)?;
    sock.stats.packets_sent += 1;
    debug!("acknowledged peer's FIN during simultaneous close, awaiting ACK of our own FIN");

    let required_ack = sock.seq_number.wrapping_add(1);
    let outcome = io::recv_raw(sock.udp(), sock.settings.ack_timeout).map_err(ShutdownError::Fatal)?;
    match outcome {
        RawRecv::Segment(_, payload) if !payload.is_empty() => {
            return Ok(Substate::FinDouble { peer_fin_seq });
        }
        RawRecv::Segment(header, _) if header.control.is_fin() => {
            // Peer retransmitted its FIN|ACK before acking ours.
            return Ok(Substate::FinDouble { peer_fin_seq: header.seq_number });
        }
        RawRecv::Segment(header, _) if header.control.is_rst() => {
            warn!("received RST while awaiting ACK of our FIN during simultaneous close");
            return Ok(Substate::Closed1);
        }
        RawRecv::Segment(header, _) if header.control.is_ack() && header.ack_number == required_ack => {
            sock.stats.packets_received += 1;
            sock.seq_number = required_ack;
            let deadline = Instant::now() + sock.settings.shutdown_time_wait;
            return Ok(Substate::TimeWait { deadline });
        }
        _ => {}
    }

    if *retries_left == 0 {
        warn!("FIN|ACK retries exhausted during simultaneous close");
        return Err(ShutdownError::FinAckRetriesExhausted.into());
    }
    *retries_left -= 1;
    sock.send_control(Control::FIN | Control::ACK, sock.ack_number)
        .map_err(ShutdownError::Fatal)?;
    sock.stats.packets_sent += 1;
    Ok(Substate::FinDouble { peer_fin_seq })
}

/// Waits up to `deadline` (default 2×MSL) for the peer's own FIN|ACK.
fn fin_wait_2_recv(sock: &mut UtcpSocket, deadline: Instant) -> Result<Substate, Error> {
    if Instant::now() >= deadline {
        warn!("timed out waiting for peer's FIN, sending RST");
        let _ = sock.send_control(Control::RST, sock.ack_number);
        return Ok(Substate::Closed1);
    }

    let outcome = io::recv_raw(sock.udp(), sock.settings.ack_timeout).map_err(ShutdownError::Fatal)?;
    match outcome {
        RawRecv::Segment(_, payload) if !payload.is_empty() => Ok(Substate::FinWait2Recv { deadline }),
        RawRecv::Segment(header, _) if header.control.is_rst() => {
            warn!("received RST while awaiting peer's FIN");
            Ok(Substate::Closed1)
        }
        RawRecv::Segment(header, _) if header.control.is_fin() => {
            sock.stats.packets_received += 1;
            sock.ack_number = header.seq_number.wrapping_add(1);
            Ok(Substate::FinWait2Send)
        }
        _ => Ok(Substate::FinWait2Recv { deadline }),
    }
}

fn fin_wait_2_send(sock: &mut UtcpSocket) -> Result<Substate, Error> {
    sock.send_control(Control::ACK, sock.ack_number)
        .map_err(ShutdownError::Fatal)?;
    sock.stats.packets_sent += 1;
    let deadline = Instant::now() + sock.settings.shutdown_time_wait;
    Ok(Substate::TimeWait { deadline })
}

/// Soaks up a retransmitted peer FIN|ACK for one 2×MSL window, re-ACKing
/// it so the peer's own TIME_WAIT can expire cleanly.
fn time_wait(sock: &mut UtcpSocket, deadline: Instant) -> Result<Substate, Error> {
    if Instant::now() >= deadline {
        return Ok(Substate::Closed1);
    }

    let outcome = io::recv_raw(sock.udp(), sock.settings.ack_timeout).map_err(ShutdownError::Fatal)?;
    match outcome {
        RawRecv::Segment(header, _) if header.control.is_rst() => Ok(Substate::Closed1),
        RawRecv::Segment(header, _) if header.control.is_fin() => {
            sock.stats.packets_received += 1;
            let _ = sock.send_control(Control::ACK, sock.ack_number);
            sock.stats.packets_sent += 1;
            Ok(Substate::TimeWait { deadline })
        }
        _ => Ok(Substate::TimeWait { deadline }),
    }
}
