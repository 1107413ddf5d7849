//! Username/password authentication (RFC 1929)

use crate::error::SocksError;
use crate::socks::auth::AuthContext;
use crate::socks::consts::*;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Looks up credentials during the username/password sub-negotiation.
pub trait CredentialStore: Send + Sync {
    /// Whether `user`/`password` is a valid pair.
    fn valid(&self, user: &str, password: &str) -> bool;
}

/// An in-memory credential store backed by a user → password map.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(HashMap<String, String>);

impl StaticCredentials {
    /// Add a credential pair.
    pub fn insert(&mut self, user: impl Into<String>, password: impl Into<String>) {
        self.0.insert(user.into(), password.into());
    }
}

impl<const N: usize> From<[(String, String); N]> for StaticCredentials {
    fn from(pairs: [(String, String); N]) -> Self {
        StaticCredentials(HashMap::from(pairs))
    }
}

impl From<HashMap<String, String>> for StaticCredentials {
    fn from(map: HashMap<String, String>) -> Self {
        StaticCredentials(map)
    }
}

impl CredentialStore for StaticCredentials {
    fn valid(&self, user: &str, password: &str) -> bool {
        self.0.get(user).map(String::as_str) == Some(password)
    }
}

/// Run the RFC 1929 sub-negotiation after method 0x02 has been selected.
///
/// A failed lookup replies `[1, 0x01]` and fails the connection.
pub(crate) async fn subnegotiate<R, W>(
    r: &mut R,
    w: &mut W,
    store: &dyn CredentialStore,
) -> Result<AuthContext, SocksError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let version = r.read_u8().await?;
    if version != SOCKS5_AUTH_VERSION {
        return Err(SocksError::UnsupportedAuthVersion(version));
    }

    let user = read_field(r).await?;
    let password = read_field(r).await?;

    match (user, password) {
        (Some(user), Some(password)) if store.valid(&user, &password) => {
            w.write_all(&[SOCKS5_AUTH_VERSION, SOCKS5_AUTH_STATUS_SUCCESS])
                .await?;
            w.flush().await?;
            let mut attrs = HashMap::new();
            attrs.insert("user".to_string(), user);
            Ok(AuthContext {
                method: SOCKS5_AUTH_METHOD_PASSWORD,
                attrs,
            })
        }
        _ => {
            w.write_all(&[SOCKS5_AUTH_VERSION, SOCKS5_AUTH_STATUS_FAILURE])
                .await?;
            w.flush().await?;
            Err(SocksError::AuthFailed)
        }
    }
}

/// Read one length-prefixed field; `None` when the bytes are not UTF-8.
async fn read_field<R>(r: &mut R) -> Result<Option<String>, SocksError>
where
    R: AsyncRead + Unpin,
{
    let len = r.read_u8().await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(String::from_utf8(buf).ok())
}
