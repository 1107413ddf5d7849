//! Destination name resolution
//!
//! The server resolves FQDN destinations through a pluggable
//! [`NameResolver`]. Two backends are provided: the operating system
//! resolver and an explicit name server queried over DNS.

use async_trait::async_trait;
use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfig, Protocol, ResolverConfig, ResolverOpts,
};
use hickory_resolver::TokioAsyncResolver;
use rand::seq::SliceRandom;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::lookup_host;

/// Timeout for queries against an explicit name server.
const NAMESERVER_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolves a destination FQDN to a single IP address.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve `name` to an IP, or fail the request.
    async fn resolve(&self, name: &str) -> io::Result<IpAddr>;
}

/// The default resolver, backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl NameResolver for SystemResolver {
    async fn resolve(&self, name: &str) -> io::Result<IpAddr> {
        lookup_host((name, 0))
            .await?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address records for {name}"),
                )
            })
    }
}

/// Which record family an explicit name server is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFamily {
    /// A records only (`ip4`)
    #[default]
    Ipv4,
    /// AAAA records only (`ip6`)
    Ipv6,
    /// Both families (`ip`)
    Any,
}

impl RecordFamily {
    /// Parse the `ip`/`ip4`/`ip6` configuration value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ip4" => Some(RecordFamily::Ipv4),
            "ip6" => Some(RecordFamily::Ipv6),
            "ip" => Some(RecordFamily::Any),
            _ => None,
        }
    }

    fn strategy(self) -> LookupIpStrategy {
        match self {
            RecordFamily::Ipv4 => LookupIpStrategy::Ipv4Only,
            RecordFamily::Ipv6 => LookupIpStrategy::Ipv6Only,
            RecordFamily::Any => LookupIpStrategy::Ipv4AndIpv6,
        }
    }
}

/// Resolves through a specific name server instead of the system config.
///
/// When a lookup returns multiple records, one is picked uniformly at
/// random so repeated requests spread across the answer set.
pub struct NameServerResolver {
    resolver: TokioAsyncResolver,
}

impl NameServerResolver {
    /// Build a resolver for `nameserver`, given as `ip` or `ip:port`
    /// (port 53 when absent).
    pub fn new(nameserver: &str, family: RecordFamily) -> io::Result<Self> {
        let addr = parse_nameserver(nameserver)?;

        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
        config.add_name_server(NameServerConfig::new(addr, Protocol::Tcp));

        let mut opts = ResolverOpts::default();
        opts.timeout = NAMESERVER_TIMEOUT;
        opts.ip_strategy = family.strategy();

        Ok(NameServerResolver {
            resolver: TokioAsyncResolver::tokio(config, opts),
        })
    }
}

#[async_trait]
impl NameResolver for NameServerResolver {
    async fn resolve(&self, name: &str) -> io::Result<IpAddr> {
        let lookup = self
            .resolver
            .lookup_ip(name)
            .await
            .map_err(io::Error::other)?;
        let records: Vec<IpAddr> = lookup.iter().collect();
        records
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address records for {name}"),
                )
            })
    }
}

fn parse_nameserver(nameserver: &str) -> io::Result<SocketAddr> {
    if let Ok(addr) = nameserver.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = nameserver.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, 53));
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid name server address: {nameserver}"),
    ))
}
