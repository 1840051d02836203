//! Peer registry — maps a registered name to its observed public endpoint.
//!
//! One registry per broker, handed to the service loop and the expiry task
//! by clone. DashMap shards its locks, so registrations for different names
//! never serialize behind each other, while writes to the same name are
//! applied in the order the service loop receives them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// The last registration seen for a name.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub name: String,
    /// Transport source of the REG datagram, never the claimed address.
    pub endpoint: SocketAddr,
    /// When this record was written. Used for TTL expiry.
    pub registered_at: Instant,
}

/// Name → endpoint mapping shared between broker tasks.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Arc<DashMap<String, PeerRecord>>,
    /// None = registrations never expire.
    ttl: Option<Duration>,
}

impl Registry {
    /// Registry whose entries never expire.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Record `observed` for `name`, replacing any earlier record.
    /// Returns the stored endpoint for the caller to echo back.
    pub fn register(&self, name: &str, observed: SocketAddr) -> SocketAddr {
        self.entries.insert(
            name.to_string(),
            PeerRecord {
                name: name.to_string(),
                endpoint: observed,
                registered_at: Instant::now(),
            },
        );
        observed
    }

    /// Endpoint last registered for `name`, if any and not expired.
    pub fn lookup(&self, name: &str) -> Option<SocketAddr> {
        self.get(name).map(|record| record.endpoint)
    }

    pub fn get(&self, name: &str) -> Option<PeerRecord> {
        let entry = self.entries.get(name)?;
        if self.is_expired(entry.value()) {
            return None;
        }
        Some(entry.value().clone())
    }

    /// Drop expired records. Returns how many were removed.
    pub fn expire_stale(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|_, record| !self.is_expired(record));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, record: &PeerRecord) -> bool {
        match self.ttl {
            Some(ttl) => record.registered_at.elapsed() >= ttl,
            None => false,
        }
    }
}
