//! # socksd - SOCKS5 Proxy Server
//!
//! socksd is a SOCKS5 proxy server (RFC 1928 + RFC 1929) with full UDP
//! ASSOCIATE support and live per-host and per-target traffic metrics.
//!
//! ## Features
//!
//! - **CONNECT relay**: concurrent bidirectional byte copy with half-close
//!   and per-direction byte accounting
//! - **UDP ASSOCIATE**: one relay socket per session, fanned out to any
//!   number of targets keyed by (client source, decoded destination)
//! - **Pluggable policy**: client IP filter, rule-set chain, address
//!   rewriter, custom resolver and dialer
//! - **Live metrics**: TTL-expiring per-host and per-target counters,
//!   readable while sessions are in flight
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksd::socks::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::new(Config::default());
//!     server.listen_and_serve("0.0.0.0:1080").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Each accepted connection runs in its own task:
//!
//! ```text
//! accept -> filter -> negotiate auth -> parse request -> resolve/rewrite
//!        -> CONNECT: dial + two relay tasks
//!        -> ASSOCIATE: UDP fan-out + reverse-path tasks
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod metrics;
pub mod policy;
pub mod resolver;
pub mod socks;
pub mod status;

// Re-export commonly used items
pub use error::{Reply, SocksError};
pub use socks::{Config, Server};

/// Version of the socksd library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
