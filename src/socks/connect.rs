//! CONNECT command handler
//!
//! Dials the target, reports the outcome to the client, then runs one relay
//! task per direction. The reverse direction is awaited first; if it fails,
//! the forward task is cancelled so the handler never blocks on a dead
//! session.

use crate::error::{Reply, SocksError};
use crate::metrics::{CounterGuard, HostMetrics, NetMetrics};
use crate::socks::addr::AddrSpec;
use crate::socks::relay::spawn_pipe;
use crate::socks::request::{send_reply, Request};
use crate::socks::Server;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::info;

impl Server {
    pub(crate) async fn handle_connect(
        &self,
        req: Request,
        host: Arc<HostMetrics>,
        reader: BufReader<OwnedReadHalf>,
        mut writer: OwnedWriteHalf,
    ) -> Result<(), SocksError> {
        info!("{} connect to {}", req.remote, req.real_dest);

        let _active = CounterGuard::enter(host.clone(), |h: &HostMetrics| &h.net.active);

        if !self.rules().allow(&req) {
            send_reply(&mut writer, Reply::RuleFailure, None).await?;
            return Err(SocksError::RuleDenied(req.dest.to_string()));
        }

        let target = match self.dial(&req.real_dest).await {
            Ok(target) => target,
            Err(e) => {
                send_reply(&mut writer, Reply::from_dial_error(&e), None).await?;
                return Err(SocksError::Dial(req.real_dest.to_string(), e));
            }
        };

        let target_metrics = self
            .target_metrics()
            .get_or_create(&req.real_dest.dial_target());
        let _target_active =
            CounterGuard::enter(target_metrics.clone(), |m: &NetMetrics| &m.active);

        let bind = AddrSpec::from_socket(target.local_addr()?);
        send_reply(&mut writer, Reply::Success, Some(&bind)).await?;

        let (target_read, target_write) = target.into_split();

        // tx carries client bytes to the target, rx carries target bytes
        // back to the client.
        let tx_host = host.clone();
        let tx_target = target_metrics.clone();
        let tx = spawn_pipe(reader, target_write, move |n| {
            tx_host.net.tx.fetch_add(n as i64, Ordering::Relaxed);
            tx_target.tx.fetch_add(n as i64, Ordering::Relaxed);
        });

        let rx_host = host.clone();
        let rx_target = target_metrics.clone();
        let rx = spawn_pipe(target_read, writer, move |n| {
            rx_host.net.rx.fetch_add(n as i64, Ordering::Relaxed);
            rx_target.rx.fetch_add(n as i64, Ordering::Relaxed);
        });

        if let Err(e) = join_pipe(rx).await {
            tx.abort();
            let _ = tx.await;
            return Err(e.into());
        }
        join_pipe(tx).await?;
        Ok(())
    }
}

async fn join_pipe(handle: JoinHandle<io::Result<()>>) -> io::Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(io::Error::other(e)),
    }
}
