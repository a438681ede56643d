//! Endpoint and token types shared by the signal channel, registry and pool.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::wire::DirectiveKind;

/// Size of a session token on the wire.
pub const TOKEN_LEN: usize = 16;

// ── Session Token ─────────────────────────────────────────────────────────────

/// Opaque identifier correlating a UDP signaling exchange with the TCP
/// connection that eventually carries it as its first frame.
///
/// Generated from a random (v4) UUID. Unguessable enough to keep sessions
/// apart; not an authentication secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken([u8; TOKEN_LEN]);

impl SessionToken {
    /// A fresh random token.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a token from an exact-length slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; TOKEN_LEN]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({self})")
    }
}

// ── Host Info ─────────────────────────────────────────────────────────────────

/// How a host takes part in a rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// The host connects back to the service's TCP port when told to.
    ReflectConnect,
    /// The host opens a listener and asks the service to connect to it.
    ReflectListen,
    /// Directly reachable. Nothing to broker, so sessions are never started.
    Direct,
}

impl Mode {
    /// The directive sent to this host once it acknowledges a SYN.
    /// `None` for hosts that cannot be reflected.
    pub fn directive(self) -> Option<DirectiveKind> {
        match self {
            Mode::ReflectConnect => Some(DirectiveKind::Connect),
            Mode::ReflectListen => Some(DirectiveKind::Listen),
            Mode::Direct => None,
        }
    }

    pub fn is_reflective(self) -> bool {
        self.directive().is_some()
    }
}

/// A reachable endpoint, either named by the caller of `start_session` or
/// learned from a heartbeat. Copied by value into registry and pool entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Signaling address (UDP) of the host.
    pub addr: SocketAddr,
    /// Opaque blob the host announced about itself. Never interpreted here.
    pub info: Bytes,
    pub mode: Mode,
}

impl HostInfo {
    pub fn new(addr: SocketAddr, mode: Mode) -> Self {
        Self {
            addr,
            info: Bytes::new(),
            mode,
        }
    }

    pub fn with_info(mut self, info: impl Into<Bytes>) -> Self {
        self.info = info.into();
        self
    }
}
