//! Test utilities for socksd integration tests
//!
//! Provides server spawning, throwaway TCP/UDP peers and small SOCKS5
//! client helpers shared across the integration tests.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use socksd::resolver::NameResolver;
use socksd::socks::{Config, Server};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Start a server with `config` on an ephemeral port.
pub async fn spawn_server(config: Config) -> (Arc<Server>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(config);
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });
    (server, addr)
}

/// A TCP peer that reads `expect` bytes, answers with `response` and
/// half-closes. Accepts any number of connections.
pub async fn spawn_tcp_responder(expect: usize, response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut conn, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; expect];
                if expect > 0 && conn.read_exact(&mut buf).await.is_err() {
                    return;
                }
                let _ = conn.write_all(response).await;
                let _ = conn.shutdown().await;
                // Drain until the client goes away.
                let mut sink = [0u8; 256];
                while matches!(conn.read(&mut sink).await, Ok(n) if n > 0) {}
            });
        }
    });
    addr
}

/// A UDP peer that echoes every datagram back to its sender.
pub async fn spawn_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 65535];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    addr
}

/// Run the greeting for the no-auth method and assert it is accepted.
pub async fn greet_no_auth(stream: &mut TcpStream) {
    stream.write_all(&[5, 1, 0]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [5, 0]);
}

/// Encode a request for `command` against an IPv4 destination.
pub fn request_bytes(command: u8, addr: SocketAddr) -> Vec<u8> {
    let IpAddr::V4(ip) = addr.ip() else {
        panic!("request_bytes expects an IPv4 destination");
    };
    let mut request = vec![5, command, 0, 1];
    request.extend_from_slice(&ip.octets());
    request.extend_from_slice(&addr.port().to_be_bytes());
    request
}

/// Encode a request for `command` against a domain destination.
pub fn domain_request_bytes(command: u8, domain: &str, port: u16) -> Vec<u8> {
    let mut request = vec![5, command, 0, 3, domain.len() as u8];
    request.extend_from_slice(domain.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    request
}

/// Read a SOCKS5 reply, returning the code and the bound address.
pub async fn read_reply(stream: &mut TcpStream) -> (u8, SocketAddr) {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 5);
    assert_eq!(head[2], 0);

    let ip: IpAddr = match head[3] {
        1 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await.unwrap();
            IpAddr::from(octets)
        }
        4 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await.unwrap();
            IpAddr::from(octets)
        }
        other => panic!("unexpected ATYP {other} in reply"),
    };
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await.unwrap();
    (head[1], SocketAddr::new(ip, u16::from_be_bytes(port)))
}

/// A resolver that answers every name with a fixed IP.
pub struct StaticResolver(pub IpAddr);

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve(&self, _name: &str) -> io::Result<IpAddr> {
        Ok(self.0)
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_for<F>(cond: F, timeout: Duration)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_echo_echoes() {
        let echo = spawn_udp_echo().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", echo).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, echo);
    }

    #[tokio::test]
    async fn test_tcp_responder_answers() {
        let addr = spawn_tcp_responder(4, b"pong").await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"ping").await.unwrap();

        let mut buf = Vec::new();
        conn.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"pong");
    }
}
