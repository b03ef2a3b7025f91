//! Minimal echo server exercising the public μTCP API end to end: bind,
//! accept one connection, echo everything back, shut down gracefully.

use std::net::SocketAddr;

use mutcp::UtcpSocket;

fn main() {
    env_logger::init();

    let local: SocketAddr = "127.0.0.1:34343".parse().unwrap();
    let mut sock = UtcpSocket::create();
    sock.bind(local).unwrap();

    println!(">>> waiting for incoming connections on {local}...");
    let peer = sock.accept().unwrap();
    println!(">>> connection accepted from {peer}");

    let mut buf = [0u8; 4096];
    loop {
        let n = match sock.recv(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                eprintln!(">>> recv failed: {err}");
                break;
            }
        };

        if let Err(err) = sock.send(&buf[..n]) {
            eprintln!(">>> send failed: {err}");
            break;
        }

        println!(">>> echoed {n} bytes: {:?}", String::from_utf8_lossy(&buf[..n]));
    }

    if let Err(err) = sock.shutdown() {
        eprintln!(">>> shutdown failed: {err}");
    }
}
