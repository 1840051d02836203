//! Rendezvous client — the peer side of the broker protocol.
//!
//! Each call is one request and one response over the peer's own socket,
//! so the broker sees the same source address the partner will later punch
//! toward. An attempt waits at most `timeout`; attempts that time out or hit
//! a socket error are retried up to `attempts` times. Definitive answers
//! (`NF`, `NG`, malformed text) are never retried.

use std::net::{SocketAddr, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use punch_core::wire::{validate_name, Request, Response, WireError, MAX_DATAGRAM, RPC_ATTEMPTS, RPC_TIMEOUT_MS};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a single broker round trip failed.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("no response after {attempts} attempt(s) of {timeout:?}")]
    Timeout { attempts: u32, timeout: Duration },

    #[error("socket error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed exchange: {0}")]
    Protocol(#[from] WireError),

    #[error("broker rejected the request")]
    Rejected,

    #[error("name is not registered")]
    NotFound,

    #[error("unexpected response {0:?}")]
    Unexpected(String),

    #[error("broker returned unusable endpoint {0:?}")]
    BadEndpoint(String),
}

/// A failed register or lookup, naming the operation and its target.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("registration of {name:?} with broker {broker} failed: {source}")]
    Registration {
        name: String,
        broker: SocketAddr,
        source: RpcError,
    },

    #[error("lookup of {name:?} via broker {broker} failed: {source}")]
    Lookup {
        name: String,
        broker: SocketAddr,
        source: RpcError,
    },
}

impl ClientError {
    pub fn rpc(&self) -> &RpcError {
        match self {
            ClientError::Registration { source, .. } | ClientError::Lookup { source, .. } => source,
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct RendezvousClient {
    socket: Arc<UdpSocket>,
    broker: SocketAddr,
    timeout: Duration,
    attempts: u32,
}

impl RendezvousClient {
    pub fn new(socket: Arc<UdpSocket>, broker: SocketAddr) -> Self {
        Self {
            socket,
            broker,
            timeout: Duration::from_millis(RPC_TIMEOUT_MS),
            attempts: RPC_ATTEMPTS,
        }
    }

    /// Override the per-attempt timeout and attempt count. `attempts` is
    /// clamped to at least one.
    pub fn with_retry(mut self, timeout: Duration, attempts: u32) -> Self {
        self.timeout = timeout;
        self.attempts = attempts.max(1);
        self
    }

    pub fn broker(&self) -> SocketAddr {
        self.broker
    }

    /// Register `name` and return the public endpoint the broker observed.
    pub async fn register_self(&self, name: &str) -> Result<SocketAddr, ClientError> {
        let fail = |source: RpcError| ClientError::Registration {
            name: name.to_string(),
            broker: self.broker,
            source,
        };

        validate_name(name).map_err(|e| fail(e.into()))?;
        let claimed = self.socket.local_addr().map_err(|e| fail(e.into()))?;
        let request = Request::Register {
            name: name.to_string(),
            claimed: claimed.to_string(),
        };

        let endpoint = match self.call(&request).await.map_err(fail)? {
            Response::Ok(endpoint) => endpoint,
            Response::NoGood => return Err(fail(RpcError::Rejected)),
            other => return Err(fail(RpcError::Unexpected(other.to_string()))),
        };
        let public = parse_endpoint(&endpoint).map_err(fail)?;

        tracing::info!(name, %public, "registration succeeded");
        Ok(public)
    }

    /// Resolve the public endpoint last registered for `name`.
    pub async fn lookup_peer(&self, name: &str) -> Result<SocketAddr, ClientError> {
        let fail = |source: RpcError| ClientError::Lookup {
            name: name.to_string(),
            broker: self.broker,
            source,
        };

        validate_name(name).map_err(|e| fail(e.into()))?;
        let request = Request::Lookup {
            name: name.to_string(),
        };

        let endpoint = match self.call(&request).await.map_err(fail)? {
            Response::Ok(endpoint) => endpoint,
            Response::NotFound => return Err(fail(RpcError::NotFound)),
            Response::NoGood => return Err(fail(RpcError::Rejected)),
        };
        let remote = parse_endpoint(&endpoint).map_err(fail)?;

        tracing::info!(name, %remote, "lookup succeeded");
        Ok(remote)
    }

    async fn call(&self, request: &Request) -> Result<Response, RpcError> {
        let bytes = request.encode();
        let mut last_transport = None;

        for attempt in 1..=self.attempts {
            self.drain_stale();
            match self.attempt(&bytes).await {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => {
                    tracing::debug!(attempt, broker = %self.broker, %request, "broker round trip timed out");
                }
                Err(RpcError::Transport(e)) => {
                    tracing::warn!(attempt, broker = %self.broker, error = %e, "broker round trip failed");
                    last_transport = Some(e);
                }
                Err(other) => return Err(other),
            }
        }

        Err(match last_transport {
            Some(e) => RpcError::Transport(e),
            None => RpcError::Timeout {
                attempts: self.attempts,
                timeout: self.timeout,
            },
        })
    }

    /// Send once and wait for the broker's answer. `Ok(None)` on timeout.
    async fn attempt(&self, bytes: &[u8]) -> Result<Option<Response>, RpcError> {
        self.socket.send_to(bytes, self.broker).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, from) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => return Ok(None),
            };
            if !same_endpoint(from, self.broker) {
                tracing::debug!(%from, len, "ignoring datagram from non-broker source");
                continue;
            }
            return Ok(Some(Response::decode(&buf[..len])?));
        }
    }

    /// Discard datagrams already queued on the socket, e.g. a late answer to
    /// an attempt that timed out.
    fn drain_stale(&self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        while let Ok((len, from)) = self.socket.try_recv_from(&mut buf) {
            tracing::trace!(%from, len, "discarding stale datagram");
        }
    }
}

fn parse_endpoint(text: &str) -> Result<SocketAddr, RpcError> {
    text.parse()
        .map_err(|_| RpcError::BadEndpoint(text.to_string()))
}

/// Compare endpoints, treating IPv4-mapped IPv6 as its IPv4 form so a
/// dual-stack socket still recognises an IPv4 broker.
fn same_endpoint(a: SocketAddr, b: SocketAddr) -> bool {
    canonical(a) == canonical(b)
}

fn canonical(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => unmap(v6),
        v4 => v4,
    }
}

fn unmap(v6: SocketAddrV6) -> SocketAddr {
    match v6.ip().to_ipv4_mapped() {
        Some(v4) => SocketAddr::from((v4, v6.port())),
        None => SocketAddr::V6(v6),
    }
}
