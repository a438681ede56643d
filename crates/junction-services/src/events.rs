//! Notifications published to the service's subscribers.

use junction_core::HostInfo;

/// Capacity of the event broadcast channel. Slow subscribers lag rather
/// than block the service.
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendezvousEvent {
    /// A TCP handoff matched its token; the session went to the handler.
    SessionStarted { name: String, host: HostInfo },
    /// The session expired, or its handoff broke after the token matched.
    SessionFailed { name: String, host: HostInfo },
    /// Pool membership changed. Carries the new size.
    HostPoolChanged { size: usize },
    /// A host not previously in the pool sent a heartbeat.
    HostArrived(HostInfo),
}
