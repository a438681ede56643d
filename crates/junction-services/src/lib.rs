//! junction-services: the rendezvous engine.
//!
//! Session registry and host pool hold all shared state. The signal
//! channel, TCP acceptor and scheduler run as tokio tasks against them,
//! wired together by [`RendezvousService`]. [`Reflector`] is the agent an
//! endpoint runs to be reachable through a rendezvous service.

mod acceptor;
pub mod events;
pub mod handoff;
pub mod pool;
pub mod reflector;
pub mod registry;
mod scheduler;
pub mod service;
pub mod session;
mod signal;

pub use events::RendezvousEvent;
pub use handoff::{HandoffError, HandoffOutcome, HandoffState, PendingConnection};
pub use pool::{HostPool, HostPoolEntry};
pub use reflector::{ReflectedSession, Reflector, ReflectorOptions};
pub use registry::{SessionEntry, SessionRegistry, SessionStatus, Sweep};
pub use service::{RendezvousService, ServiceOptions, StartError};
pub use session::{Session, SessionHandler};
