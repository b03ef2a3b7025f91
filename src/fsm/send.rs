//! Congestion-controlled data transmission.
//!
//! Grounded on `fsm_send.c`: slow start and congestion avoidance, triple
//! duplicate-ACK fast retransmit, and a retransmission sweep that
//! interleaves retransmits with non-blocking ACK polls so a burst of
//! stale segments doesn't all go out back-to-back with no chance to
//! notice the peer has already caught up.

use log::{debug, trace, warn};

use crate::err::{Error, SendError};
use crate::io::{self, RawRecv};
use crate::segment::{self, Control};
use crate::socket::{State, UtcpSocket};

/// Number of duplicate ACKs (beyond the original) that trigger a fast
/// retransmit, matching `DUPLICATE_ACK_COUNT_FOR_FAST_RETRANSMIT`.
const FAST_RETRANSMIT_THRESHOLD: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    SlowStart,
    CongestionAvoidance,
}

struct Ctx {
    /// Offset into `buf` of the first byte that hasn't been queued for
    /// transmission yet.
    offset: usize,
    algorithm: Algorithm,
    last_ack_seen: u32,
    duplicate_acks: u8,
    zero_window_probing: bool,
}

pub(crate) fn run(sock: &mut UtcpSocket, buf: &[u8]) -> Result<usize, Error> {
    let mut ctx = Ctx {
        offset: 0,
        algorithm: Algorithm::SlowStart,
        last_ack_seen: sock.seq_number,
        duplicate_acks: 0,
        zero_window_probing: false,
    };

    while ctx.offset < buf.len() || !sock.send_queue.is_empty() {
        send_data_round(sock, buf, &mut ctx)?;

        while !sock.send_queue.is_empty() {
            match receive_and_process_ack(sock, &mut ctx, true)? {
                AckRound::Continue => {}
                AckRound::NeedsRetransmit => retransmissions(sock, buf, &mut ctx)?,
                AckRound::PeerClosing => return Err(SendError::PeerClosing.into()),
                AckRound::Reset => return Err(SendError::Reset.into()),
            }
        }
    }

    Ok(buf.len())
}

/// `SEND_DATA_ROUND`: queues as much of the remaining buffer as the
/// congestion and peer windows allow, `mss` bytes at a time.
fn send_data_round(sock: &mut UtcpSocket, buf: &[u8], ctx: &mut Ctx) -> Result<(), Error> {
    let remaining = buf.len() - ctx.offset;
    if remaining == 0 {
        return Ok(());
    }
    let peer_window = if ctx.zero_window_probing {
        sock.settings.mss as u32
    } else {
        sock.peer_win_size as u32
    };
    let budget = (sock.cwnd.min(peer_window) as usize).min(remaining);
    if budget == 0 {
        // Zero receive window: probe with one byte instead of spinning.
        return probe_zero_window(sock, buf, ctx);
    }

    let payload_cap = sock.settings.mss.saturating_sub(segment::HEADER_SIZE);
    let mut sent = 0usize;
    while sent < budget {
        let chunk = (budget - sent).min(payload_cap);
        let seq = sock.seq_number;
        let payload = &buf[ctx.offset + sent..ctx.offset + sent + chunk];
        io::send_segment(sock.udp(), seq, sock.ack_number, Control::ACK, sock.rrb().advertised_window(), payload, payload_cap)
            .map_err(SendError::Fatal)?;
        sock.stats.packets_sent += 1;
        sock.stats.bytes_sent += chunk as u64;
        sock.send_queue.enqueue(seq, ctx.offset + sent, chunk);
        sock.seq_number = sock.seq_number.wrapping_add(chunk as u32);
        sent += chunk;
    }
    ctx.offset += sent;
    trace!("queued {sent} bytes, cwnd={} peer_window={peer_window}", sock.cwnd);
    Ok(())
}

/// Sends a single-byte probe while the peer's advertised window is zero,
/// using WIN|ACK the way `handle_zero_peer_window` was meant to (the
/// reference implementation leaves this branch an unimplemented assert;
/// this is the rewrite the design notes call for).
fn probe_zero_window(sock: &mut UtcpSocket, buf: &[u8], ctx: &mut Ctx) -> Result<(), Error> {
    if ctx.offset >= buf.len() {
        return Ok(());
    }
    ctx.zero_window_probing = true;
    let seq = sock.seq_number;
    let byte = &buf[ctx.offset..ctx.offset + 1];
    io::send_segment(sock.udp(), seq, sock.ack_number, Control::WIN | Control::ACK, sock.rrb().advertised_window(), byte, sock.settings.mss)
        .map_err(SendError::Fatal)?;
    sock.stats.packets_sent += 1;
    sock.send_queue.enqueue(seq, ctx.offset, 1);
    sock.seq_number = sock.seq_number.wrapping_add(1);
    ctx.offset += 1;
    debug!("peer window is zero, sent a 1-byte WIN|ACK probe");
    Ok(())
}

enum AckRound {
    Continue,
    NeedsRetransmit,
    PeerClosing,
    Reset,
}

/// `RECV_ACK_ROUND` / one iteration of `receive_and_process_ack`.
fn receive_and_process_ack(sock: &mut UtcpSocket, ctx: &mut Ctx, block: bool) -> Result<AckRound, Error> {
    let timeout = if block {
        sock.settings.ack_timeout
    } else {
        // `set_read_timeout` rejects a literal zero duration (it reads as
        // "block forever"); a microsecond is effectively non-blocking for
        // a loopback/LAN round trip without tripping that restriction.
        std::time::Duration::from_micros(1)
    };
    let outcome = io::recv_raw(sock.udp(), timeout).map_err(SendError::Fatal)?;
    match outcome {
        RawRecv::Timeout => {
            if block {
                warn!("ACK timeout, falling back to retransmission");
                respond_to_timeout(sock, ctx);
                Ok(AckRound::NeedsRetransmit)
            } else {
                Ok(AckRound::Continue)
            }
        }
        RawRecv::Corrupt => Ok(AckRound::Continue),
        RawRecv::Segment(header, _) if header.control.is_rst() => {
            sock.state = State::Reset;
            Ok(AckRound::Reset)
        }
        RawRecv::Segment(header, _) if header.control.is_fin() => Ok(AckRound::PeerClosing),
        RawRecv::Segment(header, _) if !header.control.is_ack() => Ok(AckRound::Continue),
        RawRecv::Segment(header, _) => {
            sock.stats.packets_received += 1;
            handle_ack(sock, ctx, header.ack_number, header.window)
        }
    }
}

fn handle_ack(sock: &mut UtcpSocket, ctx: &mut Ctx, ack_number: u32, window: u16) -> Result<AckRound, Error> {
    let is_duplicate = sock
        .send_queue
        .front()
        .is_some_and(|front| ack_number == front.seq_number);

    if is_duplicate {
        ctx.duplicate_acks += 1;
        if ctx.duplicate_acks >= FAST_RETRANSMIT_THRESHOLD {
            respond_to_triple_dup_ack(sock, ctx);
            return Ok(AckRound::NeedsRetransmit);
        }
        return Ok(AckRound::Continue);
    }

    ctx.duplicate_acks = 0;
    ctx.last_ack_seen = crate::seq::most_recent(ctx.last_ack_seen, ack_number);
    ctx.zero_window_probing = false;

    let freed = sock.send_queue.dequeue_up_to(ack_number);
    if freed > 0 {
        congestion_control_on_ack(sock, ctx);
    }
    sock.peer_win_size = window;
    Ok(AckRound::Continue)
}

/// `handle_cwnd_increment`: slow start grows by one MSS per ACK until
/// `cwnd` crosses `ssthresh`, after which congestion avoidance takes over.
fn congestion_control_on_ack(sock: &mut UtcpSocket, ctx: &mut Ctx) {
    let mss = sock.settings.mss as u32;
    match ctx.algorithm {
        Algorithm::SlowStart => {
            sock.cwnd += mss;
            if sock.cwnd > sock.ssthresh {
                ctx.algorithm = Algorithm::CongestionAvoidance;
            }
        }
        Algorithm::CongestionAvoidance => {
            sock.cwnd += (mss.saturating_mul(mss) / sock.cwnd.max(1)).max(1);
        }
    }
}

/// `respond_to_timeout`.
fn respond_to_timeout(sock: &mut UtcpSocket, ctx: &mut Ctx) {
    sock.ssthresh = (sock.cwnd / 2).max(sock.settings.mss as u32);
    sock.cwnd = sock.settings.mss as u32;
    ctx.duplicate_acks = 0;
    ctx.algorithm = Algorithm::SlowStart;
    sock.stats.packets_lost += 1;
}

/// `respond_to_triple_dup_ack`.
fn respond_to_triple_dup_ack(sock: &mut UtcpSocket, ctx: &mut Ctx) {
    sock.ssthresh = (sock.cwnd / 2).max(sock.settings.mss as u32);
    sock.cwnd = sock.settings.mss as u32;
    ctx.duplicate_acks = 0;
    ctx.algorithm = Algorithm::CongestionAvoidance;
    sock.stats.packets_lost += 1;
}

/// `execute_retransmissions_substate`: walk the send queue front-to-back,
/// resending while the cumulative resend stays within `cwnd`, polling for
/// a fresh ACK (non-blocking) after each individual resend so a peer that
/// has actually caught up short-circuits the rest of the sweep.
fn retransmissions(sock: &mut UtcpSocket, buf: &[u8], ctx: &mut Ctx) -> Result<(), Error> {
    let mut resent = 0u32;
    let mut index = 0usize;
    loop {
        let before = sock.send_queue.stored_segments();
        let node = match sock.send_queue.iter().nth(index) {
            Some(n) => *n,
            None => break,
        };
        if resent + node.size as u32 > sock.cwnd {
            break;
        }

        let payload = &buf[node.offset..node.offset + node.size];
        io::send_segment(
            sock.udp(),
            node.seq_number,
            sock.ack_number,
            Control::ACK,
            sock.rrb().advertised_window(),
            payload,
            sock.settings.mss,
        )
        .map_err(SendError::Fatal)?;
        sock.stats.packets_sent += 1;
        resent += node.size as u32;

        match receive_and_process_ack(sock, ctx, false)? {
            AckRound::Reset => return Err(SendError::Reset.into()),
            AckRound::PeerClosing => return Err(SendError::PeerClosing.into()),
            _ => {}
        }

        if sock.send_queue.stored_segments() != before {
            index = 0;
        } else {
            index += 1;
        }
        if index >= sock.send_queue.stored_segments() {
            break;
        }
    }
    Ok(())
}
