//! SOCKS5 address codec
//!
//! Reads and writes the `ATYP ADDR PORT` address form shared by requests,
//! replies and UDP datagram headers.

use crate::error::SocksError;
use crate::socks::consts::*;
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A destination or bound address in a SOCKS5 message.
///
/// Exactly one of `fqdn` and `ip` is populated by [`AddrSpec::read_from`].
/// After name resolution the resolved IP is stored in `ip` while the FQDN is
/// retained for rule evaluation and logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddrSpec {
    /// Domain name, when the client sent ATYP=3
    pub fqdn: Option<String>,
    /// IP address, either from the wire or from the resolver
    pub ip: Option<IpAddr>,
    /// Port in host byte order
    pub port: u16,
}

impl AddrSpec {
    /// Build an `AddrSpec` from a socket address.
    pub fn from_socket(addr: SocketAddr) -> Self {
        AddrSpec {
            fqdn: None,
            ip: Some(addr.ip()),
            port: addr.port(),
        }
    }

    /// Build an `AddrSpec` from a domain name and port.
    pub fn domain(name: impl Into<String>, port: u16) -> Self {
        AddrSpec {
            fqdn: Some(name.into()),
            ip: None,
            port,
        }
    }

    /// The socket address to dial, when an IP is known.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(ip, self.port))
    }

    /// A `host:port` string suitable for dialing; prefers the IP and falls
    /// back to the FQDN.
    pub fn dial_target(&self) -> String {
        match (self.ip, &self.fqdn) {
            (Some(ip), _) => SocketAddr::new(ip, self.port).to_string(),
            (None, Some(fqdn)) => format!("{}:{}", fqdn, self.port),
            (None, None) => format!(":{}", self.port),
        }
    }

    /// Decode one address from the stream, starting at the ATYP byte.
    pub async fn read_from<R>(r: &mut R) -> Result<Self, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        let atyp = r.read_u8().await?;
        let mut spec = match atyp {
            SOCKS5_ADDR_TYPE_IPV4 => {
                let mut octets = [0u8; 4];
                r.read_exact(&mut octets).await?;
                AddrSpec {
                    fqdn: None,
                    ip: Some(IpAddr::V4(Ipv4Addr::from(octets))),
                    port: 0,
                }
            }
            SOCKS5_ADDR_TYPE_IPV6 => {
                let mut octets = [0u8; 16];
                r.read_exact(&mut octets).await?;
                AddrSpec {
                    fqdn: None,
                    ip: Some(IpAddr::V6(Ipv6Addr::from(octets))),
                    port: 0,
                }
            }
            SOCKS5_ADDR_TYPE_DOMAIN => {
                let len = r.read_u8().await? as usize;
                if len == 0 {
                    return Err(SocksError::InvalidDomain("empty domain".to_string()));
                }
                let mut name = vec![0u8; len];
                r.read_exact(&mut name).await?;
                let name = String::from_utf8(name)
                    .map_err(|e| SocksError::InvalidDomain(e.to_string()))?;
                AddrSpec {
                    fqdn: Some(name),
                    ip: None,
                    port: 0,
                }
            }
            other => return Err(SocksError::UnrecognizedAddrType(other)),
        };
        spec.port = r.read_u16().await?;
        Ok(spec)
    }

    /// Encode this address in the symmetric wire form.
    ///
    /// An address with neither FQDN nor IP encodes as IPv4 `0.0.0.0`, the
    /// form used for replies that carry no meaningful bound address.
    pub async fn write_to<W>(&self, w: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::with_capacity(MAX_DOMAIN_LEN + 4);
        match (&self.fqdn, self.ip) {
            (Some(fqdn), _) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_DOMAIN);
                buf.put_u8(fqdn.len().min(MAX_DOMAIN_LEN) as u8);
                buf.put_slice(&fqdn.as_bytes()[..fqdn.len().min(MAX_DOMAIN_LEN)]);
            }
            (None, Some(IpAddr::V4(ip))) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV4);
                buf.put_slice(&ip.octets());
            }
            (None, Some(IpAddr::V6(ip))) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV6);
                buf.put_slice(&ip.octets());
            }
            (None, None) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV4);
                buf.put_slice(&Ipv4Addr::UNSPECIFIED.octets());
            }
        }
        buf.put_u16(self.port);
        w.write_all(&buf).await
    }
}

impl From<SocketAddr> for AddrSpec {
    fn from(addr: SocketAddr) -> Self {
        AddrSpec::from_socket(addr)
    }
}

impl fmt::Display for AddrSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.fqdn, self.ip) {
            (Some(fqdn), Some(ip)) => write!(f, "{} ({}):{}", fqdn, ip, self.port),
            (Some(fqdn), None) => write!(f, "{}:{}", fqdn, self.port),
            (None, Some(ip)) => write!(f, "{}:{}", ip, self.port),
            (None, None) => write!(f, "0.0.0.0:{}", self.port),
        }
    }
}
