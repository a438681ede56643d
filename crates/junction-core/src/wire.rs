//! Junction wire format: the UDP control datagrams of the rendezvous protocol.
//!
//! Every datagram starts with a 4-byte header: a fixed signature followed by
//! an opcode, both big-endian. The payload layout depends on the opcode:
//!
//! ```text
//! [u16 SIGNATURE][u16 opcode]
//!   SYN / ACK:                  [16-byte token]
//!   HEARTBEAT:                  [encrypted info blob]
//!   CONNECT_HOST / LISTEN_HOST: [u16 listen_port][16-byte token]
//! ```
//!
//! Headers are zerocopy structs built from network-endian integers, so
//! there is no manual byte shuffling and no unsafe code in this module.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::network_endian::U16;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::host::{SessionToken, TOKEN_LEN};

// ── Headers ───────────────────────────────────────────────────────────────────

/// Leading header of every control datagram.
///
/// Wire size: 4 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct SignalHeader {
    /// Always `SIGNATURE`. Anything else is dropped without a reply.
    pub signature: U16,
    pub opcode: U16,
}

assert_eq_size!(SignalHeader, [u8; 4]);

/// Prefix of a directive payload, followed by the token.
///
/// Wire size: 2 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct DirectiveHeader {
    /// TCP port the receiver should connect to. 0 is invalid.
    pub listen_port: U16,
}

assert_eq_size!(DirectiveHeader, [u8; 2]);

const HEADER_LEN: usize = std::mem::size_of::<SignalHeader>();
const DIRECTIVE_LEN: usize = std::mem::size_of::<DirectiveHeader>();

// ── Opcodes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Syn = 0x0001,
    Ack = 0x0002,
    Heartbeat = 0x0003,
    ConnectHost = 0x0004,
    ListenHost = 0x0005,
}

impl TryFrom<u16> for Opcode {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Opcode::Syn),
            0x0002 => Ok(Opcode::Ack),
            0x0003 => Ok(Opcode::Heartbeat),
            0x0004 => Ok(Opcode::ConnectHost),
            0x0005 => Ok(Opcode::ListenHost),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

impl From<Opcode> for u16 {
    fn from(op: Opcode) -> u16 {
        op as u16
    }
}

/// Which side of the TCP connection the receiver of a directive takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    /// Receiver connects to the sender's `listen_port`.
    Connect,
    /// Receiver opens a listener and reports its port back.
    Listen,
}

impl DirectiveKind {
    fn opcode(self) -> Opcode {
        match self {
            DirectiveKind::Connect => Opcode::ConnectHost,
            DirectiveKind::Listen => Opcode::ListenHost,
        }
    }
}

// ── Signals ───────────────────────────────────────────────────────────────────

/// A decoded control datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Syn(SessionToken),
    Ack(SessionToken),
    /// Still-encrypted info blob. Decryption is the receiver's concern.
    Heartbeat(Bytes),
    Directive {
        kind: DirectiveKind,
        listen_port: u16,
        token: SessionToken,
    },
}

impl Signal {
    pub fn opcode(&self) -> Opcode {
        match self {
            Signal::Syn(_) => Opcode::Syn,
            Signal::Ack(_) => Opcode::Ack,
            Signal::Heartbeat(_) => Opcode::Heartbeat,
            Signal::Directive { kind, .. } => kind.opcode(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let header = SignalHeader {
            signature: U16::new(SIGNATURE),
            opcode: U16::new(self.opcode().into()),
        };

        let mut out = Vec::with_capacity(HEADER_LEN + DIRECTIVE_LEN + TOKEN_LEN);
        out.extend_from_slice(header.as_bytes());

        match self {
            Signal::Syn(token) | Signal::Ack(token) => {
                out.extend_from_slice(token.as_bytes());
            }
            Signal::Heartbeat(blob) => {
                out.extend_from_slice(blob);
            }
            Signal::Directive {
                listen_port, token, ..
            } => {
                let directive = DirectiveHeader {
                    listen_port: U16::new(*listen_port),
                };
                out.extend_from_slice(directive.as_bytes());
                out.extend_from_slice(token.as_bytes());
            }
        }
        out
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let header = SignalHeader::read_from_prefix(datagram)
            .ok_or(WireError::Truncated(datagram.len()))?;

        let signature = header.signature.get();
        if signature != SIGNATURE {
            return Err(WireError::BadSignature(signature));
        }

        let payload = &datagram[HEADER_LEN..];
        match Opcode::try_from(header.opcode.get())? {
            Opcode::Syn => Ok(Signal::Syn(parse_token(payload)?)),
            Opcode::Ack => Ok(Signal::Ack(parse_token(payload)?)),
            Opcode::Heartbeat => Ok(Signal::Heartbeat(Bytes::copy_from_slice(payload))),
            op @ (Opcode::ConnectHost | Opcode::ListenHost) => {
                let directive = DirectiveHeader::read_from_prefix(payload)
                    .ok_or(WireError::Truncated(datagram.len()))?;
                let kind = if op == Opcode::ConnectHost {
                    DirectiveKind::Connect
                } else {
                    DirectiveKind::Listen
                };
                Ok(Signal::Directive {
                    kind,
                    listen_port: directive.listen_port.get(),
                    token: parse_token(&payload[DIRECTIVE_LEN..])?,
                })
            }
        }
    }
}

fn parse_token(bytes: &[u8]) -> Result<SessionToken, WireError> {
    SessionToken::from_slice(bytes).ok_or(WireError::BadTokenLength(bytes.len()))
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Leading signature of every control datagram ("JC").
pub const SIGNATURE: u16 = 0x4A43;

/// Receive buffer size for control datagrams.
pub const MAX_DATAGRAM: usize = 2048;

/// Default UDP and TCP port of the rendezvous service.
pub const DEFAULT_PORT: u16 = 7300;

/// Default session expiry, measured from `start_session`.
pub const SESSION_TIMEOUT_MS: u64 = 10_000;

/// Default scheduler period. Pending SYNs are resent once per tick.
pub const TICK_MS: u64 = 1_000;

/// Default host pool TTL in seconds.
/// Hosts not heard from within this window are evicted.
pub const HOST_TTL_SECS: u64 = 30;

/// Default heartbeat interval of a reflector, in seconds.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting a control datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram truncated at {0} bytes")]
    Truncated(usize),

    #[error("bad signature: 0x{0:04x}")]
    BadSignature(u16),

    #[error("unknown opcode: 0x{0:04x}")]
    UnknownOpcode(u16),

    #[error("token must be {} bytes, got {0}", TOKEN_LEN)]
    BadTokenLength(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
