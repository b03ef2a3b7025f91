//! μTCP: a reliable, connection-oriented, congestion-controlled transport
//! protocol layered over UDP. See [`UtcpSocket`] for the public lifecycle
//! API (`bind`/`connect`/`accept`/`send`/`recv`/`shutdown`).
//!
//! The module layout mirrors the four interlocking pieces the protocol
//! actually needs: the wire codec ([`segment`]), the datagram transport
//! primitives ([`io`]), the two data-path structures shared between the
//! send and receive sides ([`send_queue`], [`rrb`]), and the finite-state
//! machines that drive a connection through its lifecycle ([`fsm`]).

mod err;
pub use err::*;

pub mod fsm;
pub mod io;
pub mod rrb;
pub mod segment;
pub mod send_queue;
pub mod seq;
pub mod settings;
pub mod socket;

pub use fsm::recv::RecvFlags;
pub use settings::Settings;
pub use socket::{State, StateSet, Stats, UtcpSocket};
