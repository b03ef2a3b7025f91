//! Minimal echo client pairing with `server.rs`: connect, send a few lines,
//! print whatever comes back, then close gracefully.

use std::net::SocketAddr;

use mutcp::UtcpSocket;

fn main() {
    env_logger::init();

    let peer: SocketAddr = "127.0.0.1:34343".parse().unwrap();
    let mut sock = UtcpSocket::create();

    println!(">>> connecting to {peer}...");
    sock.connect(peer).unwrap();
    println!(">>> connected");

    let messages = ["hello from the client", "a second message", "goodbye"];
    let mut buf = [0u8; 4096];

    for message in messages {
        sock.send(message.as_bytes()).unwrap();
        let n = sock.recv(&mut buf).unwrap();
        println!(">>> echoed back: {:?}", String::from_utf8_lossy(&buf[..n]));
    }

    sock.shutdown().unwrap();
    println!(">>> connection closed");
}
