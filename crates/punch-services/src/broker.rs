//! Broker service loop.
//!
//! Receives one request per datagram, applies it to the registry and sends
//! the response back to the datagram's source. A bad datagram only costs
//! that one request: decode failures are answered with `NG`, socket errors
//! are logged, and the loop keeps serving until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use punch_core::wire::{Request, Response, MAX_DATAGRAM};

use crate::registry::Registry;

pub struct Broker {
    socket: Arc<UdpSocket>,
    registry: Registry,
    shutdown: broadcast::Receiver<()>,
}

impl Broker {
    pub fn new(socket: Arc<UdpSocket>, registry: Registry, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            socket,
            registry,
            shutdown,
        }
    }

    /// Serve until the shutdown signal fires.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        if let Ok(addr) = self.socket.local_addr() {
            tracing::info!(%addr, ttl = ?self.registry.ttl(), "broker serving");
        }

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("broker shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, source) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };

                    let response = handle_datagram(&self.registry, &buf[..len], source);

                    match self.socket.send_to(&response.encode(), source).await {
                        Ok(_) => tracing::info!(%source, %response, "send"),
                        Err(e) => tracing::warn!(%source, error = %e, "failed to send response"),
                    }
                }
            }
        }
    }
}

/// Decode one datagram from `source` and produce its response.
pub fn handle_datagram(registry: &Registry, datagram: &[u8], source: SocketAddr) -> Response {
    match Request::decode(datagram) {
        Ok(request) => {
            tracing::info!(%source, %request, "recv");
            dispatch(registry, request, source)
        }
        Err(e) => {
            tracing::warn!(%source, error = %e, "malformed request");
            Response::NoGood
        }
    }
}

/// Apply a decoded request. `source` is the observed transport address and
/// is the only address ever recorded.
pub fn dispatch(registry: &Registry, request: Request, source: SocketAddr) -> Response {
    match request {
        Request::Register { name, claimed } => {
            if claimed != source.to_string() {
                tracing::debug!(name = %name, claimed = %claimed, observed = %source, "recording observed address");
            }
            let stored = registry.register(&name, source);
            Response::Ok(stored.to_string())
        }
        Request::Lookup { name } => match registry.lookup(&name) {
            Some(endpoint) => Response::Ok(endpoint.to_string()),
            None => {
                tracing::debug!(name = %name, "lookup miss");
                Response::NotFound
            }
        },
        Request::Unknown { command } => {
            tracing::debug!(command = %command, %source, "unrecognized command");
            Response::NoGood
        }
    }
}

/// Remove registrations older than the registry TTL.
///
/// Returns at once for a registry without a TTL.
pub async fn expiry_loop(registry: Registry, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    if registry.ttl().is_none() {
        return Ok(());
    }
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            _ = interval.tick() => {
                let removed = registry.expire_stale();
                if removed > 0 {
                    tracing::debug!(removed, remaining = registry.len(), "expired registrations");
                }
            }
        }
    }
}
