//! Punch integration test harness.
//!
//! Every test runs a real broker and real peers on loopback UDP inside the
//! test process. Sockets bind port 0, so tests can run in parallel.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};

use punch_core::wire::MAX_DATAGRAM;
use punch_services::{Broker, HolePunchSession, Registry, SessionConfig, SessionState};

mod failures;
mod punch;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A broker serving on loopback until `shutdown` fires or the test ends.
pub struct TestBroker {
    pub addr: SocketAddr,
    pub registry: Registry,
    pub shutdown: broadcast::Sender<()>,
    pub task: tokio::task::JoinHandle<Result<()>>,
}

pub async fn spawn_broker() -> Result<TestBroker> {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
    let addr = socket.local_addr()?;
    let registry = Registry::new();
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(Broker::new(socket, registry.clone(), shutdown.subscribe()).run());
    Ok(TestBroker {
        addr,
        registry,
        shutdown,
        task,
    })
}

pub async fn bind_peer() -> Result<Arc<UdpSocket>> {
    Ok(Arc::new(UdpSocket::bind("127.0.0.1:0").await?))
}

/// Session settings scaled down so a full punch takes well under a second.
pub fn fast_config(local: &str, remote: &str, broker: SocketAddr) -> SessionConfig {
    let mut config = SessionConfig::new(local, remote, broker);
    config.settle_delay = Duration::from_millis(200);
    config.keepalive_interval = Duration::from_millis(50);
    config.rpc_timeout = Duration::from_millis(200);
    config.rpc_attempts = 3;
    config
}

pub fn new_session(local: &str, remote: &str, broker: SocketAddr, socket: Arc<UdpSocket>) -> HolePunchSession {
    HolePunchSession::new(fast_config(local, remote, broker), socket)
}

/// Send one raw datagram and return the text of the single reply.
pub async fn exchange(socket: &UdpSocket, to: SocketAddr, request: &[u8]) -> Result<String> {
    socket.send_to(request, to).await?;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (len, from) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .context("timed out waiting for reply")??;
    if from != to {
        bail!("reply came from {from}, expected {to}");
    }
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

/// Wait up to `secs` for the watched session to reach `target`.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<SessionState>,
    target: SessionState,
    secs: u64,
) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(secs), rx.wait_for(|s| *s == target))
        .await
        .with_context(|| format!("session did not reach {target} within {secs}s"))?
        .context("session state channel closed")?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// The harness broker answers at all before anything else is tested.
#[tokio::test]
async fn test_broker_answers_on_loopback() -> Result<()> {
    let broker = spawn_broker().await?;
    let client = bind_peer().await?;

    let reply = exchange(&client, broker.addr, b"GET nobody").await?;
    assert_eq!(reply, "NF");
    Ok(())
}
