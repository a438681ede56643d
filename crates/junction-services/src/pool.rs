//! Host pool: endpoints that announced themselves with a heartbeat.
//!
//! Keyed on the heartbeat's source address (IP + port), so a host that keeps
//! announcing from the same socket refreshes one entry. Entries expire after
//! a TTL. The pool is plain data: deciding what to tell subscribers is the
//! caller's job.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use junction_core::HostInfo;

#[derive(Debug, Clone)]
pub struct HostPoolEntry {
    pub host: HostInfo,
    /// Last time a heartbeat arrived from this host. Used for TTL expiry.
    pub last_seen: Instant,
}

/// Shared between the signal channel (inserts) and the scheduler (expiry).
/// Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct HostPool {
    hosts: Arc<DashMap<SocketAddr, HostPoolEntry>>,
}

impl HostPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a host. Returns true when the host was not in the
    /// pool before, i.e. membership changed.
    pub fn put(&self, host: HostInfo) -> bool {
        self.put_at(host, Instant::now())
    }

    pub fn put_at(&self, host: HostInfo, now: Instant) -> bool {
        self.hosts
            .insert(
                host.addr,
                HostPoolEntry {
                    host,
                    last_seen: now,
                },
            )
            .is_none()
    }

    /// Remove hosts not seen for `ttl` or longer. Returns how many went.
    pub fn clean_expired(&self, now: Instant, ttl: Duration) -> usize {
        let mut removed = 0;
        self.hosts.retain(|_, entry| {
            let alive = now.saturating_duration_since(entry.last_seen) < ttl;
            if !alive {
                removed += 1;
            }
            alive
        });
        removed
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<HostPoolEntry> {
        self.hosts.get(addr).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> Vec<HostInfo> {
        self.hosts
            .iter()
            .map(|entry| entry.value().host.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
