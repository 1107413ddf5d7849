//! socksd - SOCKS5 proxy server
//!
//! This is the main entry point for the socksd application.

use anyhow::{Context, Result};
use clap::Parser;
use socksd::policy::{CidrFilter, RuleSet};
use socksd::resolver::{NameServerResolver, RecordFamily};
use socksd::socks::{Config, Server, StaticCredentials};
use socksd::status::serve_status;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// socksd - SOCKS5 proxy server with live metrics
#[derive(Parser, Debug)]
#[command(name = "socksd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Username for proxy authentication (empty disables auth)
    #[arg(long, env = "PROXY_USER", default_value = "")]
    user: String,

    /// Password for proxy authentication
    #[arg(long, env = "PROXY_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Port the proxy listens on
    #[arg(long, env = "PROXY_PORT", default_value_t = 1080)]
    port: u16,

    /// Port for the HTTP status/metrics page (disabled when unset)
    #[arg(long, env = "PROXY_STATUS_PORT")]
    status_port: Option<u16>,

    /// Explicit name server for destination resolution, ip[:port]
    #[arg(long, env = "PROXY_RESOLVER")]
    resolver: Option<String>,

    /// Record family for the explicit resolver: ip, ip4 or ip6
    #[arg(long, env = "PROXY_RESOLVER_NET", default_value = "ip4")]
    resolver_net: String,

    /// Regex of allowed destination FQDNs (all allowed when unset)
    #[arg(long, env = "ALLOWED_DEST_FQDN")]
    allowed_dest_fqdn: Option<String>,

    /// Comma-separated CIDR allow-list for client IPs
    #[arg(long, env = "ALLOWED_CIDR", value_delimiter = ',')]
    allowed_cidr: Vec<String>,

    /// Local IP for UDP relay sockets
    #[arg(long, env = "PROXY_BIND_IP")]
    bind_ip: Option<IpAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level)?;

    let mut config = Config::default();

    if !args.user.is_empty() || !args.password.is_empty() {
        let mut credentials = StaticCredentials::default();
        credentials.insert(args.user.clone(), args.password.clone());
        config.credentials = Some(Arc::new(credentials));
    }

    if let Some(pattern) = &args.allowed_dest_fqdn {
        config.rules =
            Some(RuleSet::dest_pattern(pattern).context("invalid ALLOWED_DEST_FQDN pattern")?);
    }

    if !args.allowed_cidr.is_empty() {
        let filter =
            CidrFilter::new(&args.allowed_cidr).context("invalid ALLOWED_CIDR entry")?;
        config.filter = Some(Arc::new(filter));
    }

    if let Some(nameserver) = &args.resolver {
        let family = RecordFamily::parse(&args.resolver_net)
            .context("PROXY_RESOLVER_NET must be one of ip, ip4, ip6")?;
        config.resolver = Some(Arc::new(NameServerResolver::new(nameserver, family)?));
    }

    config.bind_ip = args.bind_ip;

    let server = Server::new(config);

    if let Some(port) = args.status_port {
        let status_server = server.clone();
        let status_addr = format!("0.0.0.0:{port}");
        tokio::spawn(async move {
            if let Err(e) = serve_status(status_server, &status_addr).await {
                error!("status page failed: {}", e);
            }
        });
    }

    info!("socksd v{}", socksd::VERSION);
    info!("start listening proxy service on port {}", args.port);
    server
        .listen_and_serve(&format!("0.0.0.0:{}", args.port))
        .await
        .context("proxy listener failed")
}

/// Setup logging based on configuration
fn setup_logging(level: &str) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
