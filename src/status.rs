//! Status and metrics page
//!
//! A minimal HTTP/1.1 responder exposing the live counters in Prometheus
//! text format. Served only when a status port is configured; the SOCKS5
//! data path never depends on it.

use crate::socks::Server;
use anyhow::Result;
use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

const INDEX_PAGE: &str = "<html>\n\t<body>\n\t\t<a href=\"/metrics\">Metrics</a>\n\t</body>\n</html>\n";

/// Serve the status page on `addr` until the listener fails.
pub async fn serve_status(server: Arc<Server>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("status page listening on http://{}", listener.local_addr()?);
    loop {
        let (conn, _) = listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_status_conn(conn, &server).await {
                debug!("status request failed: {}", e);
            }
        });
    }
}

async fn handle_status_conn(conn: TcpStream, server: &Server) -> Result<()> {
    let mut reader = BufReader::new(conn);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");

    let (status, content_type, body) = match path {
        "/" => ("200 OK", "text/html", INDEX_PAGE.to_string()),
        "/metrics" => (
            "200 OK",
            "text/plain; version=0.0.4",
            render_metrics(server),
        ),
        _ => ("404 Not Found", "text/plain", "not found\n".to_string()),
    };

    let mut conn = reader.into_inner();
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    conn.write_all(response.as_bytes()).await?;
    conn.shutdown().await?;
    Ok(())
}

/// Render every live counter in Prometheus text format.
pub fn render_metrics(server: &Server) -> String {
    let mut out = String::new();
    server.range_host_metrics(|host, m| {
        let _ = writeln!(
            out,
            "proxy_connect_tx{{remote=\"{}\"}} {}",
            host,
            m.net.tx.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "proxy_connect_rx{{remote=\"{}\"}} {}",
            host,
            m.net.rx.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "proxy_connect_active{{remote=\"{}\"}} {}",
            host,
            m.net.active.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "proxy_udp_active{{remote=\"{}\"}} {}",
            host,
            m.active_udp.load(Ordering::Relaxed)
        );
        for (command, counter) in m.commands.iter().enumerate() {
            let _ = writeln!(
                out,
                "proxy_connect_count{{remote=\"{}\",command=\"{}\"}} {}",
                host,
                command,
                counter.load(Ordering::Relaxed)
            );
        }
    });
    server.range_target_metrics(|target, m| {
        let _ = writeln!(
            out,
            "proxy_target_active{{target=\"{}\"}} {}",
            target,
            m.active.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "proxy_target_rx{{target=\"{}\"}} {}",
            target,
            m.rx.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "proxy_target_tx{{target=\"{}\"}} {}",
            target,
            m.tx.load(Ordering::Relaxed)
        );
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::Config;

    #[test]
    fn test_render_metrics_empty_server() {
        let server = Server::new(Config::default());
        assert!(render_metrics(&server).is_empty());
    }

    #[test]
    fn test_render_metrics_lists_hosts_and_targets() {
        let server = Server::new(Config::default());
        let host = server.host_metrics().get_or_create("192.0.2.1");
        host.net.tx.fetch_add(42, Ordering::Relaxed);
        host.record_command(1);
        server.target_metrics().get_or_create("93.184.216.34:80");

        let rendered = render_metrics(&server);
        assert!(rendered.contains("proxy_connect_tx{remote=\"192.0.2.1\"} 42"));
        assert!(rendered.contains("proxy_connect_count{remote=\"192.0.2.1\",command=\"1\"} 1"));
        assert!(rendered.contains("proxy_target_active{target=\"93.184.216.34:80\"} 0"));
    }
}
