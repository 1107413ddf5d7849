//! Error types for socksd
//!
//! This module defines the error type used throughout the server and the
//! SOCKS5 reply codes sent back to clients.

use std::io;
use std::net::IpAddr;
use thiserror::Error;

/// Errors produced while serving a single SOCKS5 connection.
///
/// A `SocksError` is always fatal to the connection that produced it; the
/// accept loop logs it and moves on.
#[derive(Error, Debug)]
pub enum SocksError {
    /// IO error on the client or target socket
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Client spoke a protocol version other than 5
    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Username/password sub-negotiation used an unknown version byte
    #[error("unsupported auth sub-negotiation version: {0}")]
    UnsupportedAuthVersion(u8),

    /// None of the client's offered methods is configured
    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    /// Credentials did not match
    #[error("authentication failed")]
    AuthFailed,

    /// ATYP byte was not IPv4, IPv6 or FQDN
    #[error("unrecognized address type: {0}")]
    UnrecognizedAddrType(u8),

    /// Domain name was empty, too long or not valid UTF-8
    #[error("invalid domain name: {0}")]
    InvalidDomain(String),

    /// Command byte was not CONNECT, BIND or ASSOCIATE
    #[error("command not supported: {0}")]
    CommandNotSupported(u8),

    /// The rule set denied the request
    #[error("request to {0} blocked by rules")]
    RuleDenied(String),

    /// The client filter denied the connection before any bytes were read
    #[error("connection from {0} not allowed by client filter")]
    FilterDenied(IpAddr),

    /// Destination name resolution failed
    #[error("failed to resolve {0}: {1}")]
    Resolve(String, io::Error),

    /// Outbound connection to the destination failed
    #[error("failed to connect to {0}: {1}")]
    Dial(String, io::Error),
}

/// Reply codes for SOCKS5 replies (RFC 1928 §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    /// Command succeeded
    Success = 0x00,
    /// General SOCKS server failure
    ServerFailure = 0x01,
    /// Connection not allowed by ruleset
    RuleFailure = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddrTypeNotSupported = 0x08,
}

impl Reply {
    /// The wire value of this reply code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Classify an outbound dial error into the reply code reported to the
    /// client. Unclassifiable errors fall back to `HostUnreachable`.
    pub fn from_dial_error(err: &io::Error) -> Reply {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Reply::ConnectionRefused,
            io::ErrorKind::NetworkUnreachable => Reply::NetworkUnreachable,
            _ => Reply::HostUnreachable,
        }
    }
}

impl From<Reply> for u8 {
    fn from(reply: Reply) -> Self {
        reply as u8
    }
}
