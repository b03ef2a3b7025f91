use crate::socket::State;

/// Top-level error type returned from the public socket API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation is not valid while the socket is in state {0:?}")]
    InvalidState(State),

    #[error("payload of {0} bytes exceeds the maximum segment size")]
    PayloadTooLarge(usize),

    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("send failed: {0}")]
    Send(#[from] SendError),

    #[error("shutdown failed: {0}")]
    Shutdown(#[from] ShutdownError),

    #[error("connection was reset by the peer")]
    ConnectionReset,

    #[error("peer has closed its write side")]
    PeerClosed,
}

/// Failure modes of the active-open (connect) handshake FSM.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("peer refused the connection (RST received after exhausting the retry budget)")]
    Refused,
    #[error("fatal I/O error during handshake: {0}")]
    Fatal(#[source] std::io::Error),
}

/// Failure modes of the data-transfer send FSM.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection was reset by the peer")]
    Reset,
    #[error("peer began shutting down mid-transfer")]
    PeerClosing,
    #[error("fatal I/O error while sending: {0}")]
    Fatal(#[source] std::io::Error),
}

/// Failure modes of the active and passive shutdown FSMs.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("peer never acknowledged our FIN after exhausting the retry budget")]
    FinAckRetriesExhausted,
    #[error("connection was reset while shutting down")]
    Reset,
    #[error("both peers initiated shutdown at the same time and the handshake was aborted")]
    DoubleFin,
    #[error("fatal I/O error during shutdown: {0}")]
    Fatal(#[source] std::io::Error),
}
