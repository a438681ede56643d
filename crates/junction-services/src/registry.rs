//! Session registry: pending rendezvous requests keyed by token.
//!
//! One mutex guards the whole map, so every mutation of an entry is
//! totally ordered. The lock is held only inside each method and never
//! across an await point; callers get clones, never references.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use junction_core::{HostInfo, SessionToken};

/// Progress of a pending session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// SYN sent, no ACK yet. Retransmitted every scheduler tick.
    AwaitAck,
    /// ACK received and directive sent. Waiting for the TCP handoff.
    Acked,
}

/// A pending session, owned by the registry until it is consumed by a
/// TCP handoff or expires.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub token: SessionToken,
    pub host: HostInfo,
    pub name: String,
    /// Caller-supplied payload. Never interpreted.
    pub data: Bytes,
    pub status: SessionStatus,
    pub created_at: Instant,
}

/// Result of one registry sweep.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Entries removed because they outlived the timeout.
    pub expired: Vec<SessionEntry>,
    /// Surviving entries still waiting for an ACK.
    pub pending: Vec<(SessionToken, HostInfo)>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionToken, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every operation leaves the map consistent before it can panic,
    // so a poisoned lock still guards valid state.
    fn entries(&self) -> MutexGuard<'_, HashMap<SessionToken, SessionEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new pending session and return its fresh token.
    pub fn create(&self, host: HostInfo, name: impl Into<String>, data: Bytes) -> SessionToken {
        self.create_at(host, name, data, Instant::now())
    }

    pub fn create_at(
        &self,
        host: HostInfo,
        name: impl Into<String>,
        data: Bytes,
        now: Instant,
    ) -> SessionToken {
        let token = SessionToken::generate();
        self.entries().insert(
            token,
            SessionEntry {
                token,
                host,
                name: name.into(),
                data,
                status: SessionStatus::AwaitAck,
                created_at: now,
            },
        );
        token
    }

    pub fn lookup(&self, token: &SessionToken) -> Option<SessionEntry> {
        self.entries().get(token).cloned()
    }

    /// Move an entry from `AwaitAck` to `Acked`.
    ///
    /// Returns the entry's host only when this call made the transition,
    /// so a duplicate ACK produces nothing to act on.
    pub fn advance(&self, token: &SessionToken) -> Option<HostInfo> {
        let mut entries = self.entries();
        let entry = entries.get_mut(token)?;
        if entry.status != SessionStatus::AwaitAck {
            return None;
        }
        entry.status = SessionStatus::Acked;
        Some(entry.host.clone())
    }

    /// Remove and return an entry. At most one caller ever gets it.
    pub fn consume(&self, token: &SessionToken) -> Option<SessionEntry> {
        self.entries().remove(token)
    }

    /// Drop an entry without reporting any outcome for it.
    pub fn cancel(&self, token: &SessionToken) -> bool {
        self.entries().remove(token).is_some()
    }

    /// Expire entries aged `timeout` or more and list the ones that still
    /// need their SYN resent.
    pub fn sweep(&self, now: Instant, timeout: Duration) -> Sweep {
        let mut sweep = Sweep::default();
        self.entries().retain(|token, entry| {
            if now.saturating_duration_since(entry.created_at) >= timeout {
                sweep.expired.push(entry.clone());
                return false;
            }
            if entry.status == SessionStatus::AwaitAck {
                sweep.pending.push((*token, entry.host.clone()));
            }
            true
        });
        sweep
    }

    /// Remove every entry. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
