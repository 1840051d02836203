//! Hole-punch session — the peer side after the socket is bound.
//!
//! States: `Init → Registered → Resolving → Establishing → Active`.
//!
//! `establish` registers with the broker, waits the settle delay so the
//! broker entry and the local NAT binding stabilise, then looks up the
//! partner. From `Establishing` two tasks share the socket:
//!
//! * the receiver logs every inbound datagram, from any source, and moves
//!   the session to `Active` on the first one;
//! * the sender emits `<name> <seq>` to the partner every keepalive
//!   interval, whether or not earlier sends failed.
//!
//! Both stop on the shutdown broadcast. The partner endpoint is fixed when
//! the lookup succeeds and is never re-resolved, so a partner whose public
//! port changes mid-session is lost. `Active` only means something arrived;
//! nothing proves the sender was the partner.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use punch_core::wire::{
    Keepalive, KEEPALIVE_INTERVAL_SECS, MAX_DATAGRAM, RPC_ATTEMPTS, RPC_TIMEOUT_MS, SETTLE_DELAY_SECS,
};

use crate::client::{ClientError, RendezvousClient};

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Registered,
    Resolving,
    Establishing,
    Active,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Init => "init",
            SessionState::Registered => "registered",
            SessionState::Resolving => "resolving",
            SessionState::Establishing => "establishing",
            SessionState::Active => "active",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub local_name: String,
    pub remote_name: String,
    pub broker: SocketAddr,
    pub settle_delay: Duration,
    pub keepalive_interval: Duration,
    pub rpc_timeout: Duration,
    pub rpc_attempts: u32,
}

impl SessionConfig {
    /// Config with the reference timings.
    pub fn new(local_name: impl Into<String>, remote_name: impl Into<String>, broker: SocketAddr) -> Self {
        Self {
            local_name: local_name.into(),
            remote_name: remote_name.into(),
            broker,
            settle_delay: Duration::from_secs(SETTLE_DELAY_SECS),
            keepalive_interval: Duration::from_secs(KEEPALIVE_INTERVAL_SECS),
            rpc_timeout: Duration::from_millis(RPC_TIMEOUT_MS),
            rpc_attempts: RPC_ATTEMPTS,
        }
    }
}

/// A datagram surfaced by the receiver.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: SocketAddr,
    pub payload: Bytes,
}

// ── Outbound seam ─────────────────────────────────────────────────────────────

/// Where keepalives go. `UdpSocket` in production; tests substitute a
/// recording sink.
pub trait DatagramSink: Send + Sync + 'static {
    fn send_to<'a>(
        &'a self,
        buf: &'a [u8],
        target: SocketAddr,
    ) -> impl Future<Output = std::io::Result<usize>> + Send + 'a;
}

impl DatagramSink for UdpSocket {
    fn send_to<'a>(
        &'a self,
        buf: &'a [u8],
        target: SocketAddr,
    ) -> impl Future<Output = std::io::Result<usize>> + Send + 'a {
        UdpSocket::send_to(self, buf, target)
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct HolePunchSession {
    config: SessionConfig,
    socket: Arc<UdpSocket>,
    /// Our endpoint as the broker observed it.
    public: Option<SocketAddr>,
    /// Partner endpoint, set once by the lookup.
    remote: Option<SocketAddr>,
    /// Next keepalive sequence number.
    seq: Arc<AtomicU64>,
    state: Arc<watch::Sender<SessionState>>,
}

/// The two running duties of an established session.
pub struct SessionHandle {
    pub receiver: JoinHandle<()>,
    /// Resolves to the number of keepalive ticks performed.
    pub sender: JoinHandle<u64>,
}

impl SessionHandle {
    /// Wait for both tasks. Returns the sender's tick count.
    pub async fn join(self) -> anyhow::Result<u64> {
        let (receiver, sender) = tokio::join!(self.receiver, self.sender);
        receiver.context("receiver task failed")?;
        sender.context("sender task failed")
    }
}

impl HolePunchSession {
    pub fn new(config: SessionConfig, socket: Arc<UdpSocket>) -> Self {
        let (state, _) = watch::channel(SessionState::Init);
        Self {
            config,
            socket,
            public: None,
            remote: None,
            seq: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions, including the receiver's move to `Active`.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn public(&self) -> Option<SocketAddr> {
        self.public
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Sequence number the next keepalive will carry.
    pub fn next_seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    /// Register, settle, and resolve the partner. On success the session is
    /// `Establishing` and the partner endpoint is returned.
    pub async fn establish(&mut self) -> Result<SocketAddr, ClientError> {
        let client = RendezvousClient::new(self.socket.clone(), self.config.broker)
            .with_retry(self.config.rpc_timeout, self.config.rpc_attempts);

        let public = client.register_self(&self.config.local_name).await?;
        self.public = Some(public);
        self.transition(SessionState::Registered);

        tokio::time::sleep(self.config.settle_delay).await;
        self.transition(SessionState::Resolving);

        let remote = client.lookup_peer(&self.config.remote_name).await?;
        self.remote = Some(remote);
        self.transition(SessionState::Establishing);

        Ok(remote)
    }

    /// Spawn the receiver and the keepalive sender. Inbound datagrams are
    /// forwarded to `inbound` when given; a full queue drops them.
    pub fn start(
        &self,
        shutdown: &broadcast::Sender<()>,
        inbound: Option<mpsc::Sender<Inbound>>,
    ) -> anyhow::Result<SessionHandle> {
        let remote = self
            .remote
            .context("session has no partner endpoint; establish it first")?;

        let receiver = tokio::spawn(receive_loop(
            self.socket.clone(),
            self.state.clone(),
            inbound,
            shutdown.subscribe(),
        ));

        let sender = tokio::spawn(keepalive_loop(
            self.socket.clone(),
            self.config.local_name.clone(),
            remote,
            self.config.keepalive_interval,
            self.seq.clone(),
            shutdown.subscribe(),
        ));

        tracing::info!(
            local = %self.config.local_name,
            remote_name = %self.config.remote_name,
            %remote,
            interval = ?self.config.keepalive_interval,
            "hole punch started"
        );

        Ok(SessionHandle { receiver, sender })
    }

    fn transition(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        tracing::info!(from = %prev, to = %next, name = %self.config.local_name, "session state");
    }
}

// ── Duties ────────────────────────────────────────────────────────────────────

/// Read datagrams until shutdown. The first one moves an `Establishing`
/// session to `Active`.
async fn receive_loop(
    socket: Arc<UdpSocket>,
    state: Arc<watch::Sender<SessionState>>,
    inbound: Option<mpsc::Sender<Inbound>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("receiver shutting down");
                return;
            }

            result = socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        continue;
                    }
                };
                let payload = Bytes::copy_from_slice(&buf[..len]);

                match Keepalive::decode(&payload) {
                    Ok(ka) => tracing::info!(%from, name = %ka.name, seq = ka.seq, "recv"),
                    Err(_) => tracing::info!(%from, len, text = %String::from_utf8_lossy(&payload), "recv"),
                }

                let activated = state.send_if_modified(|s| {
                    if *s == SessionState::Establishing {
                        *s = SessionState::Active;
                        true
                    } else {
                        false
                    }
                });
                if activated {
                    tracing::info!(%from, "session active");
                }

                if let Some(tx) = &inbound {
                    if tx.try_send(Inbound { from, payload }).is_err() {
                        tracing::debug!(%from, "inbound queue unavailable, dropping datagram");
                    }
                }
            }
        }
    }
}

/// Send one keepalive per interval tick until shutdown. A failed send is
/// logged and the next tick proceeds. Returns the number of ticks.
pub async fn keepalive_loop<S: DatagramSink>(
    sink: Arc<S>,
    name: String,
    remote: SocketAddr,
    interval: Duration,
    seq: Arc<AtomicU64>,
    mut shutdown: broadcast::Receiver<()>,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(ticks, "keepalive sender shutting down");
                return ticks;
            }

            _ = ticker.tick() => {
                ticks += 1;
                let payload = Keepalive {
                    name: name.clone(),
                    seq: seq.fetch_add(1, Ordering::Relaxed),
                };
                match sink.send_to(&payload.encode(), remote).await {
                    Ok(_) => tracing::info!(%remote, %payload, "send"),
                    Err(e) => tracing::warn!(%remote, seq = payload.seq, error = %e, "keepalive send failed"),
                }
            }
        }
    }
}
