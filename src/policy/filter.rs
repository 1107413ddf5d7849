//! Client IP filtering
//!
//! The filter runs on accept, before a single protocol byte is read, so a
//! denied peer never receives a SOCKS reply.

use ipnet::IpNet;
use std::net::IpAddr;

/// A predicate on the peer IP of an incoming connection.
pub trait ClientFilter: Send + Sync {
    /// Whether a connection from `ip` may proceed.
    fn allowed(&self, ip: IpAddr) -> bool;
}

/// The default filter: every client is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ClientFilter for AllowAll {
    fn allowed(&self, _ip: IpAddr) -> bool {
        true
    }
}

/// Allows a client iff some configured CIDR prefix contains its IP.
#[derive(Debug, Clone, Default)]
pub struct CidrFilter {
    cidrs: Vec<IpNet>,
}

impl CidrFilter {
    /// Parse a list of CIDR prefixes such as `10.0.0.0/8` or `fd00::/8`.
    pub fn new<I, S>(cidrs: I) -> Result<Self, ipnet::AddrParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for cidr in cidrs {
            parsed.push(cidr.as_ref().trim().parse()?);
        }
        Ok(CidrFilter { cidrs: parsed })
    }
}

impl ClientFilter for CidrFilter {
    fn allowed(&self, ip: IpAddr) -> bool {
        self.cidrs.iter().any(|net| net.contains(&ip))
    }
}
