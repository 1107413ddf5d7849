//! SOCKS5 request parsing and replies
//!
//! ```text
//! +----+-----+-------+------+----------+----------+
//! |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
//! +----+-----+-------+------+----------+----------+
//! | 1  |  1  | X'00' |  1   | Variable |    2     |
//! +----+-----+-------+------+----------+----------+
//! ```

use crate::error::{Reply, SocksError};
use crate::socks::addr::AddrSpec;
use crate::socks::auth::AuthContext;
use crate::socks::consts::*;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The request commands defined by RFC 1928.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Establish a TCP connection to the destination
    Connect,
    /// Wait for an inbound connection (acknowledged but unsupported)
    Bind,
    /// Open a UDP relay on behalf of the client
    Associate,
}

impl Command {
    /// Parse a command byte; `None` for unknown commands.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_CONNECT => Some(Command::Connect),
            SOCKS5_CMD_BIND => Some(Command::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(Command::Associate),
            _ => None,
        }
    }

    /// The wire value of this command.
    pub fn code(self) -> u8 {
        match self {
            Command::Connect => SOCKS5_CMD_CONNECT,
            Command::Bind => SOCKS5_CMD_BIND,
            Command::Associate => SOCKS5_CMD_UDP_ASSOCIATE,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect => write!(f, "CONNECT"),
            Command::Bind => write!(f, "BIND"),
            Command::Associate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// A parsed client request.
///
/// The command is kept as the raw byte so that unknown commands still reach
/// dispatch and receive a `commandNotSupported` reply. Fields are filled in
/// by the connection handler and are not mutated after dispatch.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Protocol version, always 5 once parsed
    pub version: u8,
    /// Raw command byte
    pub command: u8,
    /// Destination as sent by the client, IP filled in after resolution
    pub dest: AddrSpec,
    /// Actual destination after the optional address rewrite
    pub real_dest: AddrSpec,
    /// The client's own address
    pub remote: AddrSpec,
    /// Attributes from the authentication step
    pub auth: AuthContext,
}

impl Request {
    /// Parse the fixed header and destination address from the stream.
    ///
    /// `remote` and `auth` are left at their defaults for the caller.
    pub async fn read_from<R>(r: &mut R) -> Result<Request, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 3];
        r.read_exact(&mut header).await?;
        if header[0] != SOCKS5_VERSION {
            return Err(SocksError::UnsupportedVersion(header[0]));
        }

        let dest = AddrSpec::read_from(r).await?;
        Ok(Request {
            version: SOCKS5_VERSION,
            command: header[1],
            real_dest: dest.clone(),
            dest,
            remote: AddrSpec::default(),
            auth: AuthContext::default(),
        })
    }
}

/// Rewrites a destination transparently, after resolution and before the
/// rule set runs.
pub trait AddressRewriter: Send + Sync {
    /// The address to actually connect to for `req`.
    fn rewrite(&self, req: &Request) -> AddrSpec;
}

/// Send a SOCKS5 reply with the given code and bound address.
///
/// `None` encodes the zero address, IPv4 `0.0.0.0:0`.
pub async fn send_reply<W>(w: &mut W, reply: Reply, bind: Option<&AddrSpec>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&[SOCKS5_VERSION, reply.code(), SOCKS5_RESERVED])
        .await?;
    match bind {
        Some(addr) => addr.write_to(w).await?,
        None => AddrSpec::default().write_to(w).await?,
    }
    w.flush().await
}
