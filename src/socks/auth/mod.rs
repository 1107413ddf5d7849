//! SOCKS5 authentication module
//!
//! Handles method negotiation and the username/password sub-protocol.

mod password;

pub use password::{CredentialStore, StaticCredentials};

use crate::error::SocksError;
use crate::socks::consts::*;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Attributes produced by the authentication step.
///
/// Lives for exactly one connection. Username/password authentication
/// records the authenticated user under the `"user"` key.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// The negotiated method code
    pub method: u8,
    /// Method-specific attributes
    pub attrs: HashMap<String, String>,
}

/// One configured authentication method.
///
/// The server builds a method-code map from its configured list and runs
/// the sub-protocol of the first client-offered method it finds there.
#[derive(Clone)]
pub enum Authenticator {
    /// RFC 1928 "no authentication required" (0x00)
    NoAuth,
    /// RFC 1929 username/password (0x02)
    UserPass(Arc<dyn CredentialStore>),
}

impl Authenticator {
    /// The method code this authenticator negotiates.
    pub fn code(&self) -> u8 {
        match self {
            Authenticator::NoAuth => SOCKS5_AUTH_METHOD_NONE,
            Authenticator::UserPass(_) => SOCKS5_AUTH_METHOD_PASSWORD,
        }
    }

    /// Run this method's sub-protocol after the method reply has been sent.
    pub async fn handshake<R, W>(&self, r: &mut R, w: &mut W) -> Result<AuthContext, SocksError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match self {
            Authenticator::NoAuth => Ok(AuthContext {
                method: SOCKS5_AUTH_METHOD_NONE,
                attrs: HashMap::new(),
            }),
            Authenticator::UserPass(store) => password::subnegotiate(r, w, store.as_ref()).await,
        }
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authenticator::NoAuth => write!(f, "NoAuth"),
            Authenticator::UserPass(_) => write!(f, "UserPass"),
        }
    }
}

/// Negotiate an authentication method and run its sub-protocol.
///
/// Expects the stream to be positioned just past the version byte. Picks the
/// first client-offered method present in `methods`; when none matches the
/// server replies `[5, 0xFF]` and the connection is failed.
pub async fn negotiate<R, W>(
    r: &mut R,
    w: &mut W,
    methods: &HashMap<u8, Authenticator>,
) -> Result<AuthContext, SocksError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let nmethods = r.read_u8().await?;
    let mut offered = vec![0u8; nmethods as usize];
    r.read_exact(&mut offered).await?;

    for code in &offered {
        if let Some(authenticator) = methods.get(code) {
            w.write_all(&[SOCKS5_VERSION, authenticator.code()]).await?;
            w.flush().await?;
            return authenticator.handshake(r, w).await;
        }
    }

    w.write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE])
        .await?;
    w.flush().await?;
    Err(SocksError::NoAcceptableMethod)
}
