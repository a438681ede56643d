//! junction-core: shared types, wire format, framing and heartbeat crypto.
//! All other Junction crates depend on this one.

pub mod config;
pub mod crypto;
pub mod frame;
pub mod host;
pub mod wire;

pub use host::{HostInfo, Mode, SessionToken, TOKEN_LEN};
pub use wire::{DirectiveKind, Signal};
