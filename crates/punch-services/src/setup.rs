//! Process setup — address resolution, socket bind, and the failure
//! categories that end the process before it serves.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use punch_core::config::ConfigError;

use crate::client::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to resolve {what} address {addr:?}: {reason}")]
    Resolve {
        what: &'static str,
        addr: String,
        reason: String,
    },

    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Registration(ClientError),

    #[error(transparent)]
    Lookup(ClientError),
}

impl From<ClientError> for SetupError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Registration { .. } => SetupError::Registration(e),
            ClientError::Lookup { .. } => SetupError::Lookup(e),
        }
    }
}

impl SetupError {
    /// Process exit status for this failure category.
    pub fn exit_code(&self) -> u8 {
        match self {
            SetupError::Config(_) => 1,
            SetupError::Registration(_) => 2,
            SetupError::Resolve { .. } => 3,
            SetupError::Bind { .. } => 4,
            SetupError::Lookup(_) => 5,
        }
    }
}

/// Resolve `addr` (host:port). When `family_of` is given, an address of the
/// same IP family is preferred so the bound socket can reach it.
pub async fn resolve(
    what: &'static str,
    addr: &str,
    family_of: Option<SocketAddr>,
) -> Result<SocketAddr, SetupError> {
    let fail = |reason: String| SetupError::Resolve {
        what,
        addr: addr.to_string(),
        reason,
    };

    let candidates: Vec<SocketAddr> = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| fail(e.to_string()))?
        .collect();

    let chosen = pick(&candidates, family_of).ok_or_else(|| fail("no addresses".into()))?;
    tracing::debug!(what, addr, resolved = %chosen, "address resolved");
    Ok(chosen)
}

pub async fn bind(addr: SocketAddr) -> Result<UdpSocket, SetupError> {
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| SetupError::Bind { addr, source })?;
    if let Ok(local) = socket.local_addr() {
        tracing::info!(%local, "socket bound");
    }
    Ok(socket)
}

fn pick(candidates: &[SocketAddr], family_of: Option<SocketAddr>) -> Option<SocketAddr> {
    family_of
        .and_then(|f| candidates.iter().find(|c| c.is_ipv4() == f.is_ipv4()))
        .or_else(|| candidates.first())
        .copied()
}
