//! Connection socket: state, statistics and the public lifecycle API.

use std::net::{SocketAddr, UdpSocket};

use log::{debug, info};
use rand::RngCore;

use crate::err::Error;
use crate::fsm;
use crate::rrb::ReceiveRingBuffer;
use crate::segment::Control;
use crate::send_queue::SendQueue;
use crate::settings::Settings;

/// Lifecycle state of a [`UtcpSocket`].
///
/// The reference implementation folds `CLOSING_BY_HOST`/`CLOSING_BY_PEER`
/// into the `state` field via bit shifts on top of the base state; this
/// crate keeps that distinction as plain enum variants instead, leaving
/// shutdown-direction bookkeeping to the variants themselves rather than
/// to bit arithmetic on a single integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// A local invariant was violated or the socket hit a fatal I/O error;
    /// nothing further may be done with it.
    Invalid,
    /// No peer, no bound address.
    Closed,
    /// Bound and waiting for an incoming SYN.
    Listen,
    /// Handshake complete, data may flow in both directions.
    Established,
    /// We sent the first FIN; our active shutdown FSM is running or has
    /// finished successfully.
    ClosingByHost,
    /// The peer sent FIN first; our passive shutdown FSM is running or has
    /// finished successfully.
    ClosingByPeer,
    /// The peer sent RST during data transfer; the connection is dead and
    /// only [`UtcpSocket::close`] may be called.
    Reset,
}

impl State {
    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// A small subset-of-states bitmask, used by internal preconditions that
/// need to check "is the socket in any of these states" in one comparison
/// rather than a chain of `==`/`||`. Modeled as a small bitset type rather
/// than pulling in a bitflags dependency, the same choice [`crate::segment::Control`]
/// makes for the wire control bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateSet(u8);

impl StateSet {
    pub const NONE: StateSet = StateSet(0);

    pub fn of(states: &[State]) -> StateSet {
        states.iter().fold(StateSet::NONE, |set, &s| set | StateSet::from(s))
    }

    pub fn contains(self, state: State) -> bool {
        self.0 & state.bit() != 0
    }
}

impl From<State> for StateSet {
    fn from(state: State) -> StateSet {
        StateSet(state.bit())
    }
}

impl std::ops::BitOr for StateSet {
    type Output = StateSet;
    fn bitor(self, rhs: StateSet) -> StateSet {
        StateSet(self.0 | rhs.0)
    }
}

/// Traffic counters, mirroring `microtcp_sock_t`'s `packets_sent`,
/// `packets_received`, `packets_lost`, and their byte-counted siblings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bytes_lost: u64,
}

/// A single end of a microTCP connection.
///
/// One socket handles everything the original split across `TcpListener`
/// and `TcpStream`: `bind` + `accept` are just two calls on the same
/// value, since this protocol has no multi-connection listener — accept
/// hands the one connection straight to the socket that listened for it.
pub struct UtcpSocket {
    pub(crate) udp: Option<UdpSocket>,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) state: State,
    pub(crate) settings: Settings,

    pub(crate) seq_number: u32,
    pub(crate) ack_number: u32,
    pub(crate) peer_win_size: u16,

    pub(crate) cwnd: u32,
    pub(crate) ssthresh: u32,

    pub(crate) send_queue: SendQueue,
    pub(crate) rrb: Option<ReceiveRingBuffer>,

    pub(crate) stats: Stats,
}

impl UtcpSocket {
    /// Creates an unbound, unconnected socket in the `Closed` state, the
    /// analogue of `microtcp_socket()`.
    pub fn create() -> UtcpSocket {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> UtcpSocket {
        UtcpSocket {
            udp: None,
            peer: None,
            state: State::Closed,
            settings,
            seq_number: 0,
            ack_number: 0,
            peer_win_size: 0,
            cwnd: 0,
            ssthresh: 0,
            send_queue: SendQueue::new(),
            rrb: None,
            stats: Stats::default(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.udp
            .as_ref()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "socket is not bound"))
            .and_then(|u| u.local_addr())
    }

    /// Binds the socket to `local` and moves it into `Listen`, ready for
    /// [`UtcpSocket::accept`]. The naming-convention quirk of the original
    /// API survives here too: bind is the operation that actually puts the
    /// socket into a listening state, there is no separate `listen` call.
    pub fn bind(&mut self, local: SocketAddr) -> Result<(), Error> {
        if self.state != State::Closed {
            return Err(Error::InvalidState(self.state));
        }
        let udp = UdpSocket::bind(local)?;
        info!("bound to {local}");
        self.udp = Some(udp);
        self.state = State::Listen;
        Ok(())
    }

    /// Blocks until a SYN arrives and the three-way handshake completes,
    /// recording the sender as our peer. There is no separate accepted
    /// socket: this socket itself becomes the established connection.
    pub fn accept(&mut self) -> Result<SocketAddr, Error> {
        if self.state != State::Listen {
            return Err(Error::InvalidState(self.state));
        }
        fsm::accept::run(self)?;
        self.state = State::Established;
        let peer = self.peer.expect("accept FSM must set peer on success");
        info!("accepted connection from {peer}");
        Ok(peer)
    }

    /// Performs the active-open three-way handshake against `peer`.
    pub fn connect(&mut self, peer: SocketAddr) -> Result<(), Error> {
        if self.state != State::Closed {
            return Err(Error::InvalidState(self.state));
        }
        if self.udp.is_none() {
            let local: SocketAddr = if peer.is_ipv4() {
                "0.0.0.0:0".parse().unwrap()
            } else {
                "[::]:0".parse().unwrap()
            };
            self.udp = Some(UdpSocket::bind(local)?);
        }
        self.udp.as_ref().unwrap().connect(peer)?;
        self.peer = Some(peer);
        self.seq_number = generate_isn();
        debug!("connecting to {peer} with isn {}", self.seq_number);

        fsm::connect::run(self)?;
        self.state = State::Established;
        info!("connected to {peer}");
        Ok(())
    }

    /// Sends `buf` in full, running the congestion-controlled send FSM
    /// until every byte has been acknowledged.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.state != State::Established {
            return Err(Error::InvalidState(self.state));
        }
        fsm::send::run(self, buf)
    }

    /// Blocks until at least one byte is available and copies as much as
    /// fits into `buf`.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if !StateSet::of(&[State::Established, State::ClosingByPeer]).contains(self.state) {
            return Err(Error::InvalidState(self.state));
        }
        fsm::recv::run(self, buf)
    }

    /// Initiates (or completes, for the passive side) connection
    /// shutdown. Dispatches to the active or passive FSM depending on
    /// whether we've already seen the peer's FIN.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        match self.state {
            State::Established => {
                fsm::shutdown_active::run(self)?;
                self.state = State::Closed;
                Ok(())
            }
            State::ClosingByPeer => {
                fsm::shutdown_passive::run(self)?;
                self.state = State::Closed;
                Ok(())
            }
            other => Err(Error::InvalidState(other)),
        }
    }

    /// Tears the connection down and reclaims its buffers regardless of
    /// state — the forceful counterpart to the graceful [`UtcpSocket::shutdown`].
    /// Attempts a graceful shutdown first when one is still possible, but
    /// releases resources even if that fails or the socket was never
    /// established, matching spec's `close` operation (valid in any state).
    pub fn close(&mut self) {
        if StateSet::of(&[State::Established, State::ClosingByPeer]).contains(self.state) {
            let _ = self.shutdown();
        }
        self.rrb = None;
        self.send_queue.flush();
        self.udp = None;
        self.peer = None;
        self.state = State::Closed;
    }

    pub(crate) fn rrb(&self) -> &ReceiveRingBuffer {
        self.rrb.as_ref().expect("rrb allocated once established")
    }

    pub(crate) fn rrb_mut(&mut self) -> &mut ReceiveRingBuffer {
        self.rrb.as_mut().expect("rrb allocated once established")
    }

    pub(crate) fn udp(&self) -> &UdpSocket {
        self.udp.as_ref().expect("socket must be bound/connected")
    }

    pub(crate) fn send_control(&self, control: Control, ack_number: u32) -> std::io::Result<usize> {
        let window = self.rrb.as_ref().map_or(self.settings.rrb_size as u16, |r| r.advertised_window());
        crate::io::send_segment(
            self.udp(),
            self.seq_number,
            ack_number,
            control,
            window,
            &[],
            self.settings.mss,
        )
    }
}

impl Drop for UtcpSocket {
    fn drop(&mut self) {
        self.close();
    }
}

/// Generates a random initial sequence number, matching the original's
/// use of `rand()` rather than the clock-driven ISN generator RFC 9293
/// describes (there is no shared ISN ticker thread in this design: each
/// socket draws its own ISN independently).
pub(crate) fn generate_isn() -> u32 {
    rand::thread_rng().next_u32()
}
