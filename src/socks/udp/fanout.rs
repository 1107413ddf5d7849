//! UDP fan-out task
//!
//! Single reader of the relay's listen socket. Each datagram is checked
//! against the control connection's client IP, parsed per RFC 1928 §7, and
//! dispatched to a per-(source, target) outbound socket. The first datagram
//! of a pair records its header; the reverse-path task prepends exactly
//! those bytes to every datagram it carries back.
//!
//! The session map is mutated only here. Reverse tasks announce their exit
//! over a channel and the fan-out performs the delete, so there is no
//! insert/delete race on a key.

use crate::metrics::{HostMetrics, MetricsMap, NetMetrics};
use crate::socks::addr::AddrSpec;
use crate::socks::consts::MAX_UDP_PACKET_SIZE;
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;
use std::io::{self, Cursor};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, warn};

struct UdpTarget {
    sock: Arc<UdpSocket>,
    metrics: Arc<NetMetrics>,
    reverse: AbortHandle,
}

/// Run the fan-out loop until the owning handler cancels it.
///
/// On cancellation the session map and the reverse-task set are dropped,
/// which closes every outbound socket.
pub(super) async fn run(
    listen: Arc<UdpSocket>,
    client_ip: IpAddr,
    host: Arc<HostMetrics>,
    target_metrics: MetricsMap<NetMetrics>,
) {
    let mut targets: HashMap<String, UdpTarget> = HashMap::new();
    let mut reverse_tasks: JoinSet<()> = JoinSet::new();
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<String>();
    let mut buf = [0u8; MAX_UDP_PACKET_SIZE];

    loop {
        tokio::select! {
            received = listen.recv_from(&mut buf) => {
                let (n, src) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        debug!("UDP relay read error: {}", e);
                        continue;
                    }
                };

                if src.ip() != client_ip {
                    warn!(
                        "dropping UDP packet from unexpected source {} (client is {})",
                        src, client_ip
                    );
                    continue;
                }

                let Some((header_len, target)) = parse_datagram(&buf[..n]).await else {
                    continue;
                };

                let key = format!("{}--{}", src, target);
                if !targets.contains_key(&key) {
                    let outbound = match connect_target(&target).await {
                        Ok(sock) => Arc::new(sock),
                        Err(e) => {
                            debug!("failed to open UDP target {}: {}", target, e);
                            continue;
                        }
                    };
                    let metrics = target_metrics.get_or_create(&target.dial_target());
                    let header = buf[..header_len].to_vec();
                    let reverse = {
                        let outbound = outbound.clone();
                        let listen = listen.clone();
                        let host = host.clone();
                        let metrics = metrics.clone();
                        let closed_tx = closed_tx.clone();
                        let key = key.clone();
                        reverse_tasks.spawn(async move {
                            reverse_path(outbound, listen, src, header, host, metrics).await;
                            let _ = closed_tx.send(key);
                        })
                    };
                    debug!("new UDP target {} for {}", target, src);
                    targets.insert(
                        key.clone(),
                        UdpTarget {
                            sock: outbound,
                            metrics,
                            reverse,
                        },
                    );
                }

                let Some(entry) = targets.get(&key) else { continue };
                let payload = &buf[header_len..n];
                host.net.tx.fetch_add(payload.len() as i64, Ordering::Relaxed);
                entry
                    .metrics
                    .tx
                    .fetch_add(payload.len() as i64, Ordering::Relaxed);

                let sent = entry.sock.send(payload).await;
                if let Err(e) = sent {
                    if !is_benign(&e) {
                        warn!("UDP send to {} failed: {}", target, e);
                    }
                    if let Some(closed) = targets.remove(&key) {
                        closed.reverse.abort();
                    }
                }
            }
            Some(key) = closed_rx.recv() => {
                if targets.remove(&key).is_some() {
                    debug!("closed UDP session {}", key);
                }
                while reverse_tasks.try_join_next().is_some() {}
            }
        }
    }
}

/// Carry datagrams from one target back to the client, wrapped with the
/// header recorded when the session was established.
async fn reverse_path(
    outbound: Arc<UdpSocket>,
    listen: Arc<UdpSocket>,
    client: SocketAddr,
    header: Vec<u8>,
    host: Arc<HostMetrics>,
    metrics: Arc<NetMetrics>,
) {
    let mut buf = [0u8; MAX_UDP_PACKET_SIZE];
    loop {
        let n = match outbound.recv(&mut buf).await {
            Ok(n) => n,
            Err(_) => break,
        };

        let mut packet = BytesMut::with_capacity(header.len() + n);
        packet.put_slice(&header);
        packet.put_slice(&buf[..n]);

        host.net.rx.fetch_add(n as i64, Ordering::Relaxed);
        metrics.rx.fetch_add(n as i64, Ordering::Relaxed);

        if listen.send_to(&packet, client).await.is_err() {
            break;
        }
    }
}

/// Split one datagram into header and decoded target.
///
/// Returns the header length (everything up to and including the port) so
/// the payload is `datagram[header_len..]`. Fragmented and malformed
/// datagrams yield `None` and are dropped without a reply.
async fn parse_datagram(datagram: &[u8]) -> Option<(usize, AddrSpec)> {
    if datagram.len() < 4 {
        return None;
    }
    // RSV is ignored; FRAG other than zero means fragmentation, which this
    // relay does not implement.
    if datagram[2] != 0 {
        return None;
    }
    let mut cursor = Cursor::new(&datagram[3..]);
    let target = AddrSpec::read_from(&mut cursor).await.ok()?;
    Some((3 + cursor.position() as usize, target))
}

async fn connect_target(target: &AddrSpec) -> io::Result<UdpSocket> {
    let local = match target.ip {
        Some(IpAddr::V6(_)) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        _ => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
    };
    let sock = UdpSocket::bind(local).await?;
    sock.connect(target.dial_target()).await?;
    Ok(sock)
}

fn is_benign(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::consts::*;

    fn datagram_to(addr: &AddrSpec, frag: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0, 0, frag];
        match (addr.ip, &addr.fqdn) {
            (Some(IpAddr::V4(ip)), _) => {
                out.push(SOCKS5_ADDR_TYPE_IPV4);
                out.extend_from_slice(&ip.octets());
            }
            (Some(IpAddr::V6(ip)), _) => {
                out.push(SOCKS5_ADDR_TYPE_IPV6);
                out.extend_from_slice(&ip.octets());
            }
            (None, Some(fqdn)) => {
                out.push(SOCKS5_ADDR_TYPE_DOMAIN);
                out.push(fqdn.len() as u8);
                out.extend_from_slice(fqdn.as_bytes());
            }
            (None, None) => unreachable!(),
        }
        out.extend_from_slice(&addr.port.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_parse_datagram_payload_slicing() {
        let addr = AddrSpec::from_socket("8.8.8.8:53".parse().unwrap());
        let datagram = datagram_to(&addr, 0, b"dns-query");

        let (header_len, target) = parse_datagram(&datagram).await.unwrap();
        // RSV(2) + FRAG(1) + ATYP(1) + IPv4(4) + PORT(2)
        assert_eq!(header_len, 10);
        assert_eq!(&datagram[header_len..], b"dns-query");
        assert_eq!(target, addr);
    }

    #[tokio::test]
    async fn test_parse_datagram_domain_header() {
        let addr = AddrSpec::domain("example.com", 443);
        let datagram = datagram_to(&addr, 0, b"x");

        let (header_len, target) = parse_datagram(&datagram).await.unwrap();
        assert_eq!(header_len, 3 + 1 + 1 + "example.com".len() + 2);
        assert_eq!(&datagram[header_len..], b"x");
        assert_eq!(target.fqdn.as_deref(), Some("example.com"));
        assert_eq!(target.port, 443);
    }

    #[tokio::test]
    async fn test_parse_datagram_drops_fragments() {
        let addr = AddrSpec::from_socket("8.8.8.8:53".parse().unwrap());
        let datagram = datagram_to(&addr, 1, b"payload");
        assert!(parse_datagram(&datagram).await.is_none());
    }

    #[tokio::test]
    async fn test_parse_datagram_too_short() {
        assert!(parse_datagram(&[0, 0, 0]).await.is_none());
        assert!(parse_datagram(&[]).await.is_none());
    }

    #[tokio::test]
    async fn test_parse_datagram_truncated_address() {
        // IPv4 header cut off after two address octets.
        let datagram = vec![0, 0, 0, SOCKS5_ADDR_TYPE_IPV4, 8, 8];
        assert!(parse_datagram(&datagram).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_payload_is_valid() {
        let addr = AddrSpec::from_socket("1.1.1.1:53".parse().unwrap());
        let datagram = datagram_to(&addr, 0, b"");

        let (header_len, _) = parse_datagram(&datagram).await.unwrap();
        assert_eq!(header_len, datagram.len());
    }
}
