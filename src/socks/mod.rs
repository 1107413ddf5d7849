//! SOCKS5 server core
//!
//! The [`Server`] owns the resolved configuration and the two metrics maps.
//! Each accepted connection is handled by an independent task that walks the
//! protocol: client filter, version byte, method negotiation, request parse,
//! resolve and rewrite, then dispatch to the CONNECT or UDP ASSOCIATE
//! handler.

mod addr;
pub mod auth;
mod connect;
mod consts;
mod relay;
mod request;
mod udp;

pub use addr::AddrSpec;
pub use auth::{AuthContext, Authenticator, CredentialStore, StaticCredentials};
pub use consts::*;
pub use request::{send_reply, AddressRewriter, Command, Request};

use crate::error::{Reply, SocksError};
use crate::metrics::{
    HostMetrics, MetricsMap, NetMetrics, HOST_METRICS_TTL, TARGET_METRICS_TTL,
};
use crate::policy::{ClientFilter, RuleSet};
use crate::resolver::{NameResolver, SystemResolver};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// Override for outbound TCP connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a TCP connection to `addr`.
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream>;
}

/// Server configuration. Immutable once handed to [`Server::new`].
///
/// Every field has a default: all clients allowed, auth-less mode (or
/// username/password when only `credentials` is set), system DNS, permit-all
/// rules, no rewrite, wildcard UDP bind, direct dialing.
#[derive(Default)]
pub struct Config {
    /// Client IP filter, checked before any bytes are read
    pub filter: Option<Arc<dyn ClientFilter>>,
    /// Authentication methods, in preference order
    pub auth_methods: Vec<Authenticator>,
    /// Credential store; enables username/password auth when
    /// `auth_methods` is empty
    pub credentials: Option<Arc<dyn CredentialStore>>,
    /// Destination name resolver
    pub resolver: Option<Arc<dyn NameResolver>>,
    /// Request rule set
    pub rules: Option<RuleSet>,
    /// Transparent destination rewriter
    pub rewriter: Option<Arc<dyn AddressRewriter>>,
    /// Local IP for the UDP relay socket
    pub bind_ip: Option<IpAddr>,
    /// Outbound dialer override
    pub dialer: Option<Arc<dyn Dialer>>,
}

/// A SOCKS5 proxy server.
pub struct Server {
    auth_methods: HashMap<u8, Authenticator>,
    filter: Option<Arc<dyn ClientFilter>>,
    resolver: Arc<dyn NameResolver>,
    rules: RuleSet,
    rewriter: Option<Arc<dyn AddressRewriter>>,
    bind_ip: Option<IpAddr>,
    dialer: Option<Arc<dyn Dialer>>,
    host_metrics: MetricsMap<HostMetrics>,
    target_metrics: MetricsMap<NetMetrics>,
}

impl Server {
    /// Build a server from `config`, applying defaults for unset fields.
    pub fn new(config: Config) -> Arc<Self> {
        let mut auth_methods = config.auth_methods;
        if auth_methods.is_empty() {
            auth_methods = match &config.credentials {
                Some(credentials) => vec![Authenticator::UserPass(credentials.clone())],
                None => vec![Authenticator::NoAuth],
            };
        }
        let auth_methods = auth_methods
            .into_iter()
            .map(|authenticator| (authenticator.code(), authenticator))
            .collect();

        Arc::new(Server {
            auth_methods,
            filter: config.filter,
            resolver: config
                .resolver
                .unwrap_or_else(|| Arc::new(SystemResolver)),
            rules: config.rules.unwrap_or_default(),
            rewriter: config.rewriter,
            bind_ip: config.bind_ip,
            dialer: config.dialer,
            host_metrics: MetricsMap::new(HOST_METRICS_TTL),
            target_metrics: MetricsMap::new(TARGET_METRICS_TTL),
        })
    }

    /// Bind a TCP listener on `addr` and serve until the listener fails.
    pub async fn listen_and_serve(self: Arc<Self>, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an existing listener.
    ///
    /// Per-connection failures are logged and never stop the loop; only an
    /// `accept` error returns.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (conn, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_conn(conn, peer).await {
                    warn!("connection from {} failed: {}", peer, e);
                }
            });
        }
    }

    /// Handle one client connection through the full protocol lifecycle.
    pub async fn serve_conn(&self, conn: TcpStream, peer: SocketAddr) -> Result<(), SocksError> {
        if let Some(filter) = &self.filter {
            if !filter.allowed(peer.ip()) {
                // Close without reading or replying.
                return Err(SocksError::FilterDenied(peer.ip()));
            }
        }

        let (read_half, mut writer) = conn.into_split();
        let mut reader = BufReader::new(read_half);

        let version = reader.read_u8().await?;
        if version != SOCKS5_VERSION {
            return Err(SocksError::UnsupportedVersion(version));
        }

        let auth = auth::negotiate(&mut reader, &mut writer, &self.auth_methods).await?;

        let mut request = match Request::read_from(&mut reader).await {
            Ok(request) => request,
            Err(SocksError::UnrecognizedAddrType(atyp)) => {
                send_reply(&mut writer, Reply::AddrTypeNotSupported, None).await?;
                return Err(SocksError::UnrecognizedAddrType(atyp));
            }
            Err(e) => return Err(e),
        };
        request.auth = auth;
        request.remote = AddrSpec::from_socket(peer);

        self.handle_request(request, reader, writer).await
    }

    /// Resolve, rewrite, account and dispatch a parsed request.
    async fn handle_request(
        &self,
        mut req: Request,
        reader: BufReader<OwnedReadHalf>,
        mut writer: OwnedWriteHalf,
    ) -> Result<(), SocksError> {
        if let Some(fqdn) = req.dest.fqdn.clone() {
            match self.resolver.resolve(&fqdn).await {
                Ok(ip) => req.dest.ip = Some(ip),
                Err(e) => {
                    send_reply(&mut writer, Reply::HostUnreachable, None).await?;
                    return Err(SocksError::Resolve(fqdn, e));
                }
            }
        }

        req.real_dest = match &self.rewriter {
            Some(rewriter) => rewriter.rewrite(&req),
            None => req.dest.clone(),
        };

        let host = self.host_metrics.get_or_create(&host_key(&req.remote));
        host.record_command(req.command);

        match Command::from_byte(req.command) {
            Some(Command::Connect) => self.handle_connect(req, host, reader, writer).await,
            Some(Command::Bind) => self.handle_bind(req, writer).await,
            Some(Command::Associate) => self.handle_associate(req, host, reader, writer).await,
            None => {
                send_reply(&mut writer, Reply::CommandNotSupported, None).await?;
                Err(SocksError::CommandNotSupported(req.command))
            }
        }
    }

    /// BIND is acknowledged but unsupported.
    async fn handle_bind(
        &self,
        req: Request,
        mut writer: OwnedWriteHalf,
    ) -> Result<(), SocksError> {
        warn!("bind requested by {}, but unsupported", req.remote);

        if !self.rules.allow(&req) {
            send_reply(&mut writer, Reply::RuleFailure, None).await?;
            return Err(SocksError::RuleDenied(req.dest.to_string()));
        }

        send_reply(&mut writer, Reply::CommandNotSupported, None).await?;
        Ok(())
    }

    pub(crate) async fn dial(&self, dest: &AddrSpec) -> io::Result<TcpStream> {
        let addr = dest.socket_addr().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "destination has no resolved address",
            )
        })?;
        match &self.dialer {
            Some(dialer) => dialer.dial(addr).await,
            None => TcpStream::connect(addr).await,
        }
    }

    pub(crate) fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub(crate) fn bind_ip(&self) -> Option<IpAddr> {
        self.bind_ip
    }

    pub(crate) fn target_metrics(&self) -> &MetricsMap<NetMetrics> {
        &self.target_metrics
    }

    #[cfg(test)]
    pub(crate) fn host_metrics(&self) -> &MetricsMap<HostMetrics> {
        &self.host_metrics
    }

    /// Visit the per-host counters of every client seen recently.
    pub fn range_host_metrics<F>(&self, f: F)
    where
        F: FnMut(&str, &Arc<HostMetrics>),
    {
        self.host_metrics.range(f)
    }

    /// Visit the per-target counters of every destination seen recently.
    pub fn range_target_metrics<F>(&self, f: F)
    where
        F: FnMut(&str, &Arc<NetMetrics>),
    {
        self.target_metrics.range(f)
    }
}

fn host_key(remote: &AddrSpec) -> String {
    match remote.ip {
        Some(ip) => ip.to_string(),
        None => remote.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults_to_no_auth() {
        let server = Server::new(Config::default());
        assert!(server.auth_methods.contains_key(&SOCKS5_AUTH_METHOD_NONE));
        assert_eq!(server.auth_methods.len(), 1);
    }

    #[test]
    fn test_new_credentials_enable_user_pass() {
        let credentials: Arc<dyn CredentialStore> =
            Arc::new(StaticCredentials::from([(
                "user".to_string(),
                "pass".to_string(),
            )]));
        let server = Server::new(Config {
            credentials: Some(credentials),
            ..Config::default()
        });
        assert!(server
            .auth_methods
            .contains_key(&SOCKS5_AUTH_METHOD_PASSWORD));
        assert!(!server.auth_methods.contains_key(&SOCKS5_AUTH_METHOD_NONE));
    }

    #[test]
    fn test_explicit_auth_methods_win() {
        let server = Server::new(Config {
            auth_methods: vec![Authenticator::NoAuth],
            credentials: Some(Arc::new(StaticCredentials::default())),
            ..Config::default()
        });
        assert!(server.auth_methods.contains_key(&SOCKS5_AUTH_METHOD_NONE));
        assert!(!server
            .auth_methods
            .contains_key(&SOCKS5_AUTH_METHOD_PASSWORD));
    }

    #[test]
    fn test_host_key_uses_ip() {
        let remote = AddrSpec::from_socket("192.0.2.7:5000".parse().unwrap());
        assert_eq!(host_key(&remote), "192.0.2.7");
    }
}
