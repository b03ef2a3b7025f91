//! End-to-end scenarios over real loopback UDP sockets, covering spec.md
//! §8's concrete scenarios: three-way handshake, in-order transfer, and
//! graceful active shutdown. These exercise the full stack (codec, FSMs,
//! RRB, send queue) together rather than any one module in isolation.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use mutcp::{Settings, UtcpSocket};

fn loopback_pair() -> (UtcpSocket, UtcpSocket) {
    loopback_pair_with(Settings::default())
}

fn loopback_pair_with(settings: Settings) -> (UtcpSocket, UtcpSocket) {
    let mut server = UtcpSocket::with_settings(settings);
    server.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let server_addr = server.local_addr().unwrap();

    let (tx, rx) = mpsc::channel();
    let server_thread = thread::spawn(move || {
        server.accept().unwrap();
        tx.send(server).unwrap();
    });

    let mut client = UtcpSocket::with_settings(settings);
    client.connect(server_addr).unwrap();

    let server = rx.recv().unwrap();
    server_thread.join().unwrap();
    (client, server)
}

#[test]
fn three_way_handshake_establishes_both_ends_in_sync() {
    let (client, server) = loopback_pair();

    assert_eq!(client.state(), mutcp::State::Established);
    assert_eq!(server.state(), mutcp::State::Established);
    // Each side's seq_number is the peer's expected ack_number: the
    // handshake leaves both counters one past each side's ISN.
    assert_eq!(server.peer_addr(), client.local_addr().ok());
}

/// Settings with a short TIME_WAIT so tests that drive a full shutdown (or
/// let `Drop` do it after an unconsumed `ESTABLISHED` socket goes out of
/// scope) don't spend real wall-clock time sitting in it.
fn fast_settings() -> Settings {
    Settings {
        shutdown_time_wait: Duration::from_millis(200),
        ..Settings::default()
    }
}

#[test]
fn in_order_data_transfer_is_delivered_byte_exact() {
    let (mut client, mut server) = loopback_pair_with(fast_settings());

    let server_thread = thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut total = Vec::new();
        while total.len() < b"hello microtcp world".len() {
            let n = server.recv(&mut buf).unwrap();
            total.extend_from_slice(&buf[..n]);
        }
        // Drains the client's closing FIN|ACK so the server's side of
        // teardown is the cheap passive path rather than Drop's blind
        // active-shutdown retry loop.
        server.recv(&mut buf).unwrap();
        server.shutdown().unwrap();
        total
    });

    client.send(b"hello microtcp world").unwrap();
    client.shutdown().unwrap();
    let received = server_thread.join().unwrap();
    assert_eq!(received, b"hello microtcp world");
}

#[test]
fn large_transfer_spanning_many_segments_round_trips() {
    let (mut client, mut server) = loopback_pair_with(fast_settings());
    let payload = vec![0x5Au8; 40_000];
    let expected = payload.clone();

    let server_thread = thread::spawn(move || {
        let mut buf = [0u8; 65536];
        let mut total = Vec::new();
        while total.len() < expected.len() {
            let n = server.recv(&mut buf).unwrap();
            total.extend_from_slice(&buf[..n]);
        }
        server.recv(&mut buf).unwrap();
        server.shutdown().unwrap();
        total
    });

    client.send(&payload).unwrap();
    client.shutdown().unwrap();
    let received = server_thread.join().unwrap();
    assert_eq!(received, payload);
}

#[test]
fn graceful_active_shutdown_closes_both_sides() {
    let settings = Settings {
        shutdown_time_wait: Duration::from_millis(300),
        ..Settings::default()
    };
    let (mut client, mut server) = loopback_pair_with(settings);

    let server_thread = thread::spawn(move || {
        let mut buf = [0u8; 64];
        // Peer's FIN arrives in place of data; recv reports 0 once the
        // passive side has folded it in.
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(n, 0);
        assert_eq!(server.state(), mutcp::State::ClosingByPeer);
        server.shutdown().unwrap();
        assert_eq!(server.state(), mutcp::State::Closed);
    });

    client.shutdown().unwrap();
    assert_eq!(client.state(), mutcp::State::Closed);
    server_thread.join().unwrap();
}
