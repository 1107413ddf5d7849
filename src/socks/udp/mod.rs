//! UDP ASSOCIATE command handler
//!
//! Opens an auxiliary UDP socket, tells the client where it is bound, and
//! hands the socket to the fan-out task. The TCP control connection is then
//! held open; its EOF bounds the lifetime of the whole UDP session.

mod fanout;

use crate::error::{Reply, SocksError};
use crate::metrics::{CounterGuard, HostMetrics};
use crate::socks::addr::AddrSpec;
use crate::socks::request::{send_reply, Request};
use crate::socks::Server;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

impl Server {
    pub(crate) async fn handle_associate(
        &self,
        req: Request,
        host: Arc<HostMetrics>,
        mut reader: BufReader<OwnedReadHalf>,
        mut writer: OwnedWriteHalf,
    ) -> Result<(), SocksError> {
        if !self.rules().allow(&req) {
            send_reply(&mut writer, Reply::RuleFailure, None).await?;
            return Err(SocksError::RuleDenied(req.dest.to_string()));
        }

        let client_ip = match req.remote.ip {
            Some(ip) => ip,
            None => {
                send_reply(&mut writer, Reply::ServerFailure, None).await?;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "client address unknown",
                )
                .into());
            }
        };

        let _active_udp = CounterGuard::enter(host.clone(), |h: &HostMetrics| &h.active_udp);

        let bind_addr = SocketAddr::new(
            self.bind_ip().unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            0,
        );
        let listen = match UdpSocket::bind(bind_addr).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                warn!("failed to bind UDP relay socket: {}", e);
                send_reply(&mut writer, Reply::ServerFailure, None).await?;
                return Err(e.into());
            }
        };

        let local = listen.local_addr()?;
        info!("{} associate with {}", req.remote, local);
        send_reply(&mut writer, Reply::Success, Some(&AddrSpec::from_socket(local))).await?;

        let relay = tokio::spawn(fanout::run(
            listen,
            client_ip,
            host.clone(),
            self.target_metrics().clone(),
        ));

        // Hold the control connection open. Any payload here is outside the
        // protocol; EOF or an error ends the session.
        let mut buf = [0u8; 128];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("control connection closed, ending UDP session on {}", local);
                    break;
                }
                Ok(n) => {
                    warn!("received {} bytes of unexpected data from {}", n, req.remote)
                }
                Err(e) => {
                    debug!("control connection error: {}", e);
                    break;
                }
            }
        }

        // Cancelling the fan-out drops every outbound socket and reverse task.
        relay.abort();
        let _ = relay.await;
        Ok(())
    }
}
